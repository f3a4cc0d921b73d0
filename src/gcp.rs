use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use parking_lot::RwLock;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::gemini::ModelError;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const SECRET_MANAGER_BASE_URL: &str = "https://secretmanager.googleapis.com/v1";

/// GCP tokens live for an hour; refresh five minutes early.
const TOKEN_TTL: Duration = Duration::from_secs(3600 - 300);

pub fn build_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(2)
        .build()
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
}

/// Application Default Credentials: metadata server first, `gcloud` second.
pub struct GcpAuth {
    client: reqwest::Client,
    cached: RwLock<Option<CachedToken>>,
}

impl GcpAuth {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            cached: RwLock::new(None),
        }
    }

    #[cfg(test)]
    fn with_cached_token(client: reqwest::Client, token: &str) -> Self {
        Self {
            client,
            cached: RwLock::new(Some(CachedToken {
                token: token.to_string(),
                expires_at: Instant::now() + TOKEN_TTL,
            })),
        }
    }

    pub async fn access_token(&self) -> Result<String, ModelError> {
        let fresh = self
            .cached
            .read()
            .as_ref()
            .filter(|c| c.expires_at > Instant::now())
            .map(|c| c.token.clone());
        if let Some(token) = fresh {
            return Ok(token);
        }

        let token = self.fetch_token().await?;
        *self.cached.write() = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + TOKEN_TTL,
        });
        Ok(token)
    }

    async fn fetch_token(&self) -> Result<String, ModelError> {
        match self.fetch_from_metadata_server().await {
            Ok(token) => {
                debug!("obtained GCP token from metadata server");
                return Ok(token);
            }
            Err(e) => debug!(error = %e, "metadata server token unavailable"),
        }

        match self.fetch_from_gcloud().await {
            Ok(token) => {
                debug!("obtained GCP token from gcloud CLI");
                Ok(token)
            }
            Err(e) => Err(ModelError::Auth(format!(
                "Failed to obtain GCP access token ({e}). Locally, run: gcloud auth application-default login"
            ))),
        }
    }

    async fn fetch_from_metadata_server(&self) -> Result<String, String> {
        let response = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(|e| format!("metadata request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("metadata server returned {}", response.status()));
        }

        let body: MetadataTokenResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid metadata token response: {e}"))?;
        Ok(body.access_token)
    }

    async fn fetch_from_gcloud(&self) -> Result<String, String> {
        let output = Command::new("gcloud")
            .args(["auth", "application-default", "print-access-token"])
            .output()
            .await
            .map_err(|e| format!("failed to run gcloud: {e}"))?;

        if !output.status.success() {
            return Err(format!(
                "gcloud auth failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err("gcloud returned empty token".to_string());
        }
        Ok(token)
    }
}

#[derive(Deserialize)]
struct AccessSecretResponse {
    payload: SecretPayload,
}

#[derive(Deserialize)]
struct SecretPayload {
    data: String,
}

/// Reads a Secret Manager version, e.g.
/// `projects/PROJECT_ID/secrets/SECRET_NAME/versions/latest`.
///
/// Best effort: any failure is logged and reported as `None`.
pub async fn read_secret_payload(auth: &GcpAuth, resource: &str) -> Option<String> {
    read_secret_payload_from(auth, SECRET_MANAGER_BASE_URL, resource).await
}

async fn read_secret_payload_from(
    auth: &GcpAuth,
    base_url: &str,
    resource: &str,
) -> Option<String> {
    match access_secret(auth, base_url, resource).await {
        Ok(text) => Some(text),
        Err(reason) => {
            warn!(resource, %reason, "secret config unavailable, continuing without it");
            None
        }
    }
}

async fn access_secret(auth: &GcpAuth, base_url: &str, resource: &str) -> Result<String, String> {
    let token = auth.access_token().await.map_err(|e| e.to_string())?;
    let url = format!("{base_url}/{resource}:access");

    let response = auth
        .client
        .get(&url)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| format!("failed to read Secret Manager response ({status}): {e}"))?;
    if !status.is_success() {
        return Err(format!("Secret Manager error {status}: {body}"));
    }

    decode_secret_response(&body)
}

fn decode_secret_response(body: &str) -> Result<String, String> {
    let parsed: AccessSecretResponse =
        serde_json::from_str(body).map_err(|e| format!("invalid response: {e}"))?;
    let bytes = BASE64
        .decode(parsed.payload.data.as_bytes())
        .map_err(|e| format!("invalid base64 payload: {e}"))?;
    String::from_utf8(bytes).map_err(|e| format!("payload is not UTF-8: {e}"))
}
