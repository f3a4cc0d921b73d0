use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::MenuError;
use crate::gemini::{Content, FunctionCall, GenerativeModel};
use crate::normalize::{NORMALIZE_REQUEST, NormalizedRequest, normalize_request, normalize_request_tool};

/// Canned plan returned in stub mode, independent of the input.
pub const STUB_PLAN: &str = "Breakfast: Simple oatmeal (if allowed)\n\
Lunch: Tofu + tomato pasta\n\
Dinner: Stir-fried spinach tofu\n\
Shopping List: (optional) olive oil, garlic";

pub const MODEL_NOT_INITIALIZED: &str = "Model not initialized (DEBUG_STUB=0, PROJECT_ID set).";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MenuResponse {
    pub result: String,
    pub normalized: Option<NormalizedRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_loaded: Option<bool>,
    pub stub: bool,
}

/// How a live exchange produced its plan.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    /// The model answered the prompt straight away.
    Direct { text: String },
    /// The model asked for `normalize_request` first, then answered.
    ToolMediated {
        text: String,
        normalized: NormalizedRequest,
    },
}

enum Exchange {
    AwaitingFirstResponse,
    AwaitingToolResult { call: FunctionCall },
    Done(PlanOutcome),
}

pub struct MenuPlanner {
    debug_stub: bool,
    model: Option<Arc<dyn GenerativeModel>>,
    config_loaded: bool,
}

impl MenuPlanner {
    pub fn new(
        debug_stub: bool,
        model: Option<Arc<dyn GenerativeModel>>,
        secret_config_text: Option<&str>,
    ) -> Self {
        Self {
            debug_stub,
            model,
            config_loaded: secret_config_text.is_some(),
        }
    }

    pub fn stub() -> Self {
        Self::new(true, None, None)
    }

    pub fn live(model: Arc<dyn GenerativeModel>, secret_config_text: Option<&str>) -> Self {
        Self::new(false, Some(model), secret_config_text)
    }

    pub fn is_stub(&self) -> bool {
        self.debug_stub
    }

    pub async fn generate_menu(&self, raw_input: &str) -> Result<MenuResponse, MenuError> {
        let user_text = raw_input.trim();
        if user_text.is_empty() {
            return Err(MenuError::InvalidInput);
        }

        if self.debug_stub {
            return Ok(MenuResponse {
                result: STUB_PLAN.to_string(),
                normalized: Some(normalize_request(user_text)),
                config_loaded: None,
                stub: true,
            });
        }

        let model = self
            .model
            .as_deref()
            .ok_or_else(|| MenuError::Configuration(MODEL_NOT_INITIALIZED.to_string()))?;

        let response = match run_exchange(model, user_text).await? {
            PlanOutcome::Direct { text } => MenuResponse {
                result: text,
                normalized: None,
                config_loaded: Some(self.config_loaded),
                stub: false,
            },
            PlanOutcome::ToolMediated { text, normalized } => MenuResponse {
                result: text,
                normalized: Some(normalized),
                config_loaded: None,
                stub: false,
            },
        };
        Ok(response)
    }
}

pub fn build_prompt(user_text: &str) -> String {
    format!(
        r#"You are a meal planning assistant.
Goal: generate a 1-day meal plan (breakfast, lunch, dinner) based on ingredients (most important) and optional constraints.
If constraints are missing, assume reasonable defaults.

First, if needed, call normalize_request(user_text=...) to extract ingredients.
Then produce the final plan.

User input:
{}"#,
        user_text.trim()
    )
}

/// Drives the fixed prompt → optional tool round → answer sequence.
pub async fn run_exchange(
    model: &dyn GenerativeModel,
    user_text: &str,
) -> Result<PlanOutcome, MenuError> {
    let prompt = build_prompt(user_text);
    let tools = [normalize_request_tool()];
    let mut state = Exchange::AwaitingFirstResponse;

    loop {
        state = match state {
            Exchange::AwaitingFirstResponse => {
                let first = model
                    .generate_content(&[Content::user_text(prompt.as_str())], &tools)
                    .await?;
                match first.function_call() {
                    Some(call) => {
                        debug!(function = %call.name, "model requested a tool call");
                        Exchange::AwaitingToolResult { call: call.clone() }
                    }
                    None => Exchange::Done(PlanOutcome::Direct { text: first.text() }),
                }
            }
            Exchange::AwaitingToolResult { call } => {
                if call.name != NORMALIZE_REQUEST {
                    return Err(MenuError::UnexpectedToolCall(call.name));
                }

                let normalized = normalize_request(call.str_arg("user_text").unwrap_or(""));
                let tool_output = serde_json::to_string(&normalized)?;
                info!(
                    ingredients = normalized.ingredients.len(),
                    "returning normalize_request result to model"
                );

                let contents = [
                    Content::user_text(prompt.as_str()),
                    Content::model_function_call(call),
                    Content::function_response(NORMALIZE_REQUEST, json!({ "content": tool_output })),
                ];
                let second = model.generate_content(&contents, &tools).await?;
                Exchange::Done(PlanOutcome::ToolMediated {
                    text: second.first_text(),
                    normalized,
                })
            }
            Exchange::Done(outcome) => return Ok(outcome),
        };
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gemini::{GenerateContentResponse, ModelError, Part, Tool};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays canned responses and records every request it receives.
    pub(crate) struct ScriptedModel {
        replies: Mutex<VecDeque<Result<GenerateContentResponse, ModelError>>>,
        pub(crate) requests: Mutex<Vec<(Vec<Content>, Vec<Tool>)>>,
    }

    impl ScriptedModel {
        pub(crate) fn new(
            replies: impl IntoIterator<Item = Result<GenerateContentResponse, ModelError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GenerativeModel for ScriptedModel {
        async fn generate_content(
            &self,
            contents: &[Content],
            tools: &[Tool],
        ) -> Result<GenerateContentResponse, ModelError> {
            self.requests.lock().push((contents.to_vec(), tools.to_vec()));
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::Api("no scripted reply left".to_string())))
        }
    }

    pub(crate) fn text_reply(text: &str) -> Result<GenerateContentResponse, ModelError> {
        Ok(GenerateContentResponse::from_parts(vec![Part::Text {
            text: text.to_string(),
        }]))
    }

    pub(crate) fn call_reply(
        name: &str,
        args: serde_json::Value,
    ) -> Result<GenerateContentResponse, ModelError> {
        Ok(GenerateContentResponse::from_parts(vec![Part::FunctionCall {
            function_call: FunctionCall {
                name: name.to_string(),
                args,
            },
        }]))
    }

    #[tokio::test]
    async fn blank_input_is_rejected_in_both_modes() {
        let model = ScriptedModel::new([]);
        for planner in [MenuPlanner::stub(), MenuPlanner::live(model.clone(), None)] {
            for input in ["", "   ", "\n\t "] {
                let err = planner.generate_menu(input).await.unwrap_err();
                assert!(matches!(err, MenuError::InvalidInput));
            }
        }
        assert!(model.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn stub_mode_returns_canned_plan_with_extraction() {
        let planner = MenuPlanner::stub();
        let response = planner
            .generate_menu("  ingredients: tofu, spinach, tomato ")
            .await
            .unwrap();
        assert!(response.stub);
        assert_eq!(response.result, STUB_PLAN);
        let normalized = response.normalized.unwrap();
        assert_eq!(normalized.ingredients, ["tofu", "spinach", "tomato"]);
        assert_eq!(normalized.notes, "ingredients: tofu, spinach, tomato");
        assert_eq!(response.config_loaded, None);
    }

    #[tokio::test]
    async fn stub_mode_still_answers_when_extraction_fails() {
        let response = MenuPlanner::stub()
            .generate_menu("I have chicken and want something light")
            .await
            .unwrap();
        assert_eq!(response.result, STUB_PLAN);
        let normalized = response.normalized.unwrap();
        assert!(normalized.ingredients.is_empty());
        assert!(normalized.error.is_some());
    }

    #[tokio::test]
    async fn live_mode_without_model_is_a_configuration_error() {
        let planner = MenuPlanner::new(false, None, None);
        let err = planner.generate_menu("eggs, rice").await.unwrap_err();
        assert!(matches!(err, MenuError::Configuration(ref m) if m == MODEL_NOT_INITIALIZED));
    }

    #[tokio::test]
    async fn direct_answer_takes_a_single_round() {
        let model = ScriptedModel::new([text_reply("Breakfast: toast")]);
        let planner = MenuPlanner::live(model.clone(), Some("servings=2"));

        let response = planner.generate_menu("toast please").await.unwrap();
        assert_eq!(
            response,
            MenuResponse {
                result: "Breakfast: toast".to_string(),
                normalized: None,
                config_loaded: Some(true),
                stub: false,
            }
        );

        let requests = model.requests.lock();
        assert_eq!(requests.len(), 1);
        let (contents, tools) = &requests[0];
        assert_eq!(contents, &vec![Content::user_text(build_prompt("toast please"))]);
        assert_eq!(tools, &vec![normalize_request_tool()]);
    }

    #[tokio::test]
    async fn tool_call_round_trips_extractor_output() {
        let model = ScriptedModel::new([
            call_reply(NORMALIZE_REQUEST, json!({"user_text": "ingredients: tofu, rice"})),
            text_reply("Dinner: tofu fried rice"),
        ]);
        let planner = MenuPlanner::live(model.clone(), None);

        let response = planner
            .generate_menu("ingredients: tofu, rice. vegan")
            .await
            .unwrap();
        assert_eq!(response.result, "Dinner: tofu fried rice");
        assert!(!response.stub);
        assert_eq!(response.config_loaded, None);
        let normalized = response.normalized.unwrap();
        assert_eq!(normalized.ingredients, ["tofu", "rice"]);
        assert_eq!(normalized.notes, "ingredients: tofu, rice");

        let requests = model.requests.lock();
        assert_eq!(requests.len(), 2);
        let (second, tools) = &requests[1];
        assert_eq!(tools, &vec![normalize_request_tool()]);
        assert_eq!(second.len(), 3);
        assert_eq!(second[0], Content::user_text(build_prompt("ingredients: tofu, rice. vegan")));
        assert_eq!(second[1].role.as_deref(), Some("model"));
        assert!(matches!(
            &second[1].parts[0],
            Part::FunctionCall { function_call } if function_call.name == NORMALIZE_REQUEST
        ));
        match &second[2].parts[0] {
            Part::FunctionResponse { function_response } => {
                assert_eq!(function_response.name, NORMALIZE_REQUEST);
                let content = function_response.response["content"].as_str().unwrap();
                let echoed: NormalizedRequest = serde_json::from_str(content).unwrap();
                assert_eq!(echoed, normalized);
            }
            other => panic!("expected function response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_mediated_answer_uses_first_text_part_only() {
        let model = ScriptedModel::new([
            call_reply(NORMALIZE_REQUEST, json!({"user_text": "eggs, ham"})),
            Ok(GenerateContentResponse::from_parts(vec![
                Part::Text {
                    text: "Breakfast: eggs".to_string(),
                },
                Part::Text {
                    text: " EXTRA".to_string(),
                },
            ])),
        ]);
        let response = MenuPlanner::live(model, None)
            .generate_menu("eggs, ham")
            .await
            .unwrap();
        assert_eq!(response.result, "Breakfast: eggs");
    }

    #[tokio::test]
    async fn direct_answer_joins_all_text_parts() {
        let model = ScriptedModel::new([Ok(GenerateContentResponse::from_parts(vec![
            Part::Text {
                text: "Breakfast: eggs".to_string(),
            },
            Part::Text {
                text: "\nDinner: ham".to_string(),
            },
        ]))]);
        let response = MenuPlanner::live(model, None)
            .generate_menu("eggs, ham")
            .await
            .unwrap();
        assert_eq!(response.result, "Breakfast: eggs\nDinner: ham");
    }

    #[tokio::test]
    async fn missing_user_text_argument_is_treated_as_empty() {
        let model = ScriptedModel::new([
            call_reply(NORMALIZE_REQUEST, json!({})),
            text_reply("Lunch: soup"),
        ]);
        let response = MenuPlanner::live(model, None)
            .generate_menu("whatever")
            .await
            .unwrap();
        let normalized = response.normalized.unwrap();
        assert!(normalized.ingredients.is_empty());
        assert_eq!(normalized.notes, "");
        assert!(normalized.error.is_some());
    }

    #[tokio::test]
    async fn unknown_tool_name_fails_without_second_round() {
        let model = ScriptedModel::new([call_reply("lookup_recipe", json!({}))]);
        let err = MenuPlanner::live(model.clone(), None)
            .generate_menu("eggs, ham")
            .await
            .unwrap_err();
        assert!(matches!(err, MenuError::UnexpectedToolCall(ref name) if name == "lookup_recipe"));
        assert_eq!(model.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn upstream_failures_propagate_unchanged() {
        let model = ScriptedModel::new([Err(ModelError::Api("Quota exceeded".to_string()))]);
        let err = MenuPlanner::live(model, None)
            .generate_menu("eggs, ham")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Vertex AI error: Quota exceeded");

        let model = ScriptedModel::new([
            call_reply(NORMALIZE_REQUEST, json!({"user_text": "eggs, ham"})),
            Err(ModelError::Auth("no credentials".to_string())),
        ]);
        let err = MenuPlanner::live(model, None)
            .generate_menu("eggs, ham")
            .await
            .unwrap_err();
        assert!(matches!(err, MenuError::Upstream(ModelError::Auth(_))));
    }

    #[test]
    fn prompt_embeds_trimmed_user_text_last() {
        let prompt = build_prompt("  ingredients: leek  ");
        assert!(prompt.starts_with("You are a meal planning assistant.\n"));
        assert!(prompt.contains("call normalize_request(user_text=...)"));
        assert!(prompt.ends_with("User input:\ningredients: leek"));
    }
}
