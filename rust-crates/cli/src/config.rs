use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use miniapp_ledger::{
    BackendConfig,
    VerifierConfig,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEFAULT_CONFIG_PATH: &str = "~/.miniapp/config.json";
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:54321";
const DEFAULT_BOT_USERNAME: &str = "ledger_bot";
const DEFAULT_APP_NAME: &str = "play";

/// Profile stored at `~/.miniapp/config.json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliConfig {
    pub backend: BackendConfig,
    #[serde(default)]
    pub verifier: Option<VerifierConfig>,
    #[serde(default = "default_bot_username")]
    pub bot_username: String,
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::new(DEFAULT_BACKEND_URL),
            verifier: None,
            bot_username: default_bot_username(),
            app_name: default_app_name(),
        }
    }
}

fn default_bot_username() -> String {
    DEFAULT_BOT_USERNAME.to_string()
}

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

/// Values from flags or the environment. They win over the profile.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub backend_url: Option<String>,
    pub api_key: Option<String>,
}

impl CliConfig {
    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(url) = &overrides.backend_url {
            self.backend.url = url.clone();
        }
        if let Some(key) = &overrides.api_key {
            self.backend.api_key = Some(key.clone());
        }
        self
    }
}

pub fn resolve_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

/// `None` when the file is missing or blank.
pub fn load(path: impl AsRef<Path>) -> Result<Option<CliConfig>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path)
        .wrap_err_with(|| format!("Failed to read config {}", path.display()))?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| eyre!("Failed to parse config {}: {e}", path.display()))
}

pub fn save(path: impl AsRef<Path>, config: &CliConfig) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(config).wrap_err("Failed to serialize config")?;
    fs::write(path, json)
        .wrap_err_with(|| format!("Failed to write config {}", path.display()))?;
    Ok(())
}
