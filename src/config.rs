use thiserror::Error;

pub const DEFAULT_LOCATION: &str = "us-central1";
pub const DEFAULT_MODEL_NAME: &str = "gemini-2.0-flash-001";
pub const DEFAULT_PORT: &str = "8080";
pub const DEFAULT_STATIC_DIR: &str = "static";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing env var PROJECT_ID (required when DEBUG_STUB is not \"1\")")]
    MissingProjectId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Answers with a canned plan and never calls the model.
    Stub,
    Live { project_id: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub location: String,
    pub model_name: String,
    /// Secret Manager resource, e.g. `projects/P/secrets/S/versions/latest`.
    pub secret_config: Option<String>,
    pub port: String,
    pub static_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// Live mode without a project id is rejected here so the process never
    /// starts serving with a half-configured model.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|s| !s.is_empty());

        let debug_stub = lookup("DEBUG_STUB").unwrap_or_else(|| "1".to_string()) == "1";
        let mode = if debug_stub {
            Mode::Stub
        } else {
            let project_id = non_empty("PROJECT_ID").ok_or(ConfigError::MissingProjectId)?;
            Mode::Live { project_id }
        };

        Ok(Self {
            mode,
            location: non_empty("LOCATION").unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            model_name: non_empty("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
            secret_config: non_empty("SECRET_CONFIG"),
            port: non_empty("PORT").unwrap_or_else(|| DEFAULT_PORT.to_string()),
            static_dir: non_empty("STATIC_DIR").unwrap_or_else(|| DEFAULT_STATIC_DIR.to_string()),
        })
    }
}
