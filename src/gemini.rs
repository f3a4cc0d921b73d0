//! Gemini `generateContent` wire types and the Vertex AI client that speaks them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::gcp::GcpAuth;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Vertex AI API error ({status}): {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Vertex AI error: {0}")]
    Api(String),
    #[error("Failed to parse Vertex AI response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0}")]
    Auth(String),
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    /// Replays a function call the model asked for.
    pub fn model_function_call(call: FunctionCall) -> Self {
        Self {
            role: Some("model".to_string()),
            parts: vec![Part::FunctionCall { function_call: call }],
        }
    }

    pub fn function_response(name: impl Into<String>, response: serde_json::Value) -> Self {
        Self {
            role: Some("function".to_string()),
            parts: vec![Part::FunctionResponse {
                function_response: FunctionResponse {
                    name: name.into(),
                    response,
                },
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl FunctionCall {
    /// String argument by name; absent or non-string values read as `None`.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(serde_json::Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: &'a [Content],
    #[serde(skip_serializing_if = "<[Tool]>::is_empty")]
    tools: &'a [Tool],
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(rename = "finishReason")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl GenerateContentResponse {
    fn first_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }

    /// First function call in the first candidate, if the model asked for one.
    pub fn function_call(&self) -> Option<&FunctionCall> {
        self.first_parts().iter().find_map(|part| match part {
            Part::FunctionCall { function_call } => Some(function_call),
            _ => None,
        })
    }

    /// Text parts of the first candidate, concatenated. Empty when there is none.
    pub fn text(&self) -> String {
        self.first_parts()
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The first text part of the first candidate only. Empty when there is none.
    pub fn first_text(&self) -> String {
        self.first_parts()
            .iter()
            .find_map(|part| match part {
                Part::Text { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn from_parts(parts: Vec<Part>) -> Self {
        Self {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: Some("model".to_string()),
                    parts,
                }),
                finish_reason: Some("STOP".to_string()),
            }],
            error: None,
        }
    }
}

/// Anything that can answer a `generateContent` call.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate_content(
        &self,
        contents: &[Content],
        tools: &[Tool],
    ) -> Result<GenerateContentResponse, ModelError>;
}

/// Gemini served from Vertex AI, authenticated with Application Default Credentials.
pub struct VertexClient {
    client: reqwest::Client,
    auth: Arc<GcpAuth>,
    project_id: String,
    location: String,
    model_name: String,
}

impl VertexClient {
    pub fn new(
        client: reqwest::Client,
        auth: Arc<GcpAuth>,
        project_id: impl Into<String>,
        location: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            auth,
            project_id: project_id.into(),
            location: location.into(),
            model_name: model_name.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:generateContent",
            location = self.location,
            project = self.project_id,
            model = self.model_name,
        )
    }
}

fn parse_response(body: &str) -> Result<GenerateContentResponse, ModelError> {
    let response: GenerateContentResponse = serde_json::from_str(body)?;
    if let Some(err) = &response.error {
        return Err(ModelError::Api(err.message.clone()));
    }
    Ok(response)
}

#[async_trait]
impl GenerativeModel for VertexClient {
    #[instrument(skip_all, fields(model = %self.model_name, turns = contents.len()))]
    async fn generate_content(
        &self,
        contents: &[Content],
        tools: &[Tool],
    ) -> Result<GenerateContentResponse, ModelError> {
        let token = self.auth.access_token().await?;
        let request = GenerateContentRequest { contents, tools };

        debug!("sending generateContent request to Vertex AI");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!(%status, "Vertex AI API error");
            return Err(ModelError::Status { status, body });
        }

        let parsed = parse_response(&body)
            .inspect_err(|e| error!(error = %e, "unusable Vertex AI response"))?;
        debug!(
            finish_reason = ?parsed.candidates.first().and_then(|c| c.finish_reason.as_deref()),
            function_call = parsed.function_call().is_some(),
            "received Vertex AI response"
        );
        Ok(parsed)
    }
}

impl fmt::Debug for VertexClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VertexClient")
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}
