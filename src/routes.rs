use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{Instrument, info, info_span};

use crate::error::detail_response;
use crate::state::AppState;

const MISSING_INDEX_HTML: &str = "<h1>Meal Planner</h1><p>Missing static/index.html</p>";

#[derive(Debug, Deserialize)]
pub struct MenuRequest {
    pub input: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/menu", post(menu))
        .nest_service("/static", ServeDir::new(state.static_dir()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    match tokio::fs::read_to_string(state.index_path()).await {
        Ok(html) => Html(html),
        Err(_) => Html(MISSING_INDEX_HTML.to_string()),
    }
}

async fn menu(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<MenuRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => return detail_response(rejection.status(), rejection.body_text()),
    };

    let request_id = uuid::Uuid::new_v4();
    let span = info_span!("menu", %request_id, stub = state.planner.is_stub());

    async move {
        match state.planner.generate_menu(&request.input).await {
            Ok(response) => {
                info!(
                    normalized = response.normalized.is_some(),
                    "menu generated"
                );
                Json(response).into_response()
            }
            Err(e) => e.into_response(),
        }
    }
    .instrument(span)
    .await
}
