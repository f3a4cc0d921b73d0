mod config;
mod error;
mod gcp;
mod gemini;
mod normalize;
mod planner;
mod routes;
mod state;

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Mode};
use crate::gcp::GcpAuth;
use crate::gemini::VertexClient;
use crate::planner::MenuPlanner;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("meal_planner=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("Meal Planner starting...");
    match &config.mode {
        Mode::Stub => info!("Mode: stub (DEBUG_STUB=1), no model calls will be made"),
        Mode::Live { project_id } => info!(
            %project_id,
            location = %config.location,
            model = %config.model_name,
            "Mode: live (Vertex AI)"
        ),
    }

    let http = gcp::build_http_client()?;
    let auth = Arc::new(GcpAuth::new(http.clone()));

    let secret_config_text = match &config.secret_config {
        Some(resource) => gcp::read_secret_payload(&auth, resource).await,
        None => None,
    };
    info!(loaded = secret_config_text.is_some(), "Secret config");

    let planner = match &config.mode {
        Mode::Stub => MenuPlanner::stub(),
        Mode::Live { project_id } => {
            let model = VertexClient::new(
                http,
                auth,
                project_id,
                &config.location,
                &config.model_name,
            );
            MenuPlanner::live(Arc::new(model), secret_config_text.as_deref())
        }
    };

    let addr = format!("0.0.0.0:{}", config.port);
    let state = Arc::new(AppState::new(config, planner));
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server running at http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
