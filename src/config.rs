use crate::launch::InitDataVerifier;
use serde::{
    Deserialize,
    Serialize,
};
use std::time::Duration;

pub const DEFAULT_USERS_TABLE: &str = "users";
pub const DEFAULT_REFERRALS_TABLE: &str = "referrals";
pub const DEFAULT_INCREMENT_FUNCTION: &str = "add_to_balance";

/// Where the hosted backend lives and how its schema is named.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_users_table")]
    pub users_table: String,
    #[serde(default = "default_referrals_table")]
    pub referrals_table: String,
    #[serde(default = "default_increment_function")]
    pub increment_function: String,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            request_timeout_secs: None,
            users_table: default_users_table(),
            referrals_table: default_referrals_table(),
            increment_function: default_increment_function(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

fn default_users_table() -> String {
    DEFAULT_USERS_TABLE.to_string()
}

fn default_referrals_table() -> String {
    DEFAULT_REFERRALS_TABLE.to_string()
}

fn default_increment_function() -> String {
    DEFAULT_INCREMENT_FUNCTION.to_string()
}

/// Launch signature checking. Absent means payloads are trusted as-is.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifierConfig {
    pub bot_token: String,
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl VerifierConfig {
    pub fn verifier(&self) -> InitDataVerifier {
        let verifier = InitDataVerifier::new(&self.bot_token);
        match self.max_age_secs {
            Some(secs) => verifier.with_max_age(Duration::from_secs(secs)),
            None => verifier,
        }
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_config__fills_schema_defaults() {
        // given
        let raw = r#"{ "url": "http://localhost:54321" }"#;

        // when
        let config: BackendConfig = serde_json::from_str(raw).unwrap();

        // then
        assert_eq!(config, BackendConfig::new("http://localhost:54321"));
        assert_eq!(config.request_timeout(), None);
    }
}
