use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::ai::ollama::DEFAULT_OLLAMA_URL;
use crate::error::{BridgeError, Result};
use crate::protocol::{LineWriter, Outbound};
use crate::state::SessionConfig;

pub const DEFAULT_MODEL: &str = "gemma3:12b";
pub const CONFIG_DIR_NAME: &str = "modelConfig";
pub const CONFIG_FILE: &str = "config.json";
pub const PROMPT_FILE: &str = "system_prompt.txt";
pub const CONFIG_DIR_ENV: &str = "CHAT_BRIDGE_CONFIG_DIR";
pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";

#[derive(Deserialize, Debug, Default)]
struct ConfigFile {
    model_name: Option<String>,
    summary_model: Option<String>,
    ollama_url: Option<String>,
}

impl SessionConfig {
    /// Settings used when the config files cannot be read.
    pub fn fallback() -> Self {
        Self {
            model_id: DEFAULT_MODEL.to_string(),
            summary_model: DEFAULT_MODEL.to_string(),
            system_prompt: String::new(),
            ollama_url: None,
        }
    }

    /// Load `config.json` and `system_prompt.txt` from `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        let prompt_path = dir.join(PROMPT_FILE);

        let config_content =
            fs::read_to_string(&config_path).map_err(|source| BridgeError::ConfigRead {
                path: config_path.clone(),
                source,
            })?;
        let file: ConfigFile =
            serde_json::from_str(&config_content).map_err(|source| BridgeError::ConfigParse {
                path: config_path.clone(),
                source,
            })?;

        let system_prompt =
            fs::read_to_string(&prompt_path).map_err(|source| BridgeError::ConfigRead {
                path: prompt_path.clone(),
                source,
            })?;

        let model_id = file
            .model_name
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let summary_model = file
            .summary_model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| model_id.clone());

        Ok(Self {
            model_id,
            summary_model,
            system_prompt,
            ollama_url: file.ollama_url,
        })
    }

    /// Load from `dir` (or the executable-relative default), degrading to
    /// [`SessionConfig::fallback`] on any failure. The error is handed back so
    /// the caller can report it on the protocol channel.
    pub fn load(dir: Option<&Path>) -> (Self, Option<BridgeError>) {
        let result = match dir {
            Some(dir) => Self::load_from(dir),
            None => default_config_dir().and_then(|dir| Self::load_from(&dir)),
        };

        match result {
            Ok(config) => (config, None),
            Err(e) => {
                tracing::warn!(error = %e, "falling back to default config");
                (Self::fallback(), Some(e))
            }
        }
    }

    /// Startup load: a failure is reported to the host as one
    /// `TOKEN:Error loading config: ...` line and the session continues with
    /// the fallback settings. Only a failed write is an error.
    pub fn load_and_report<W: Write>(
        dir: Option<&Path>,
        out: &mut LineWriter<W>,
    ) -> Result<Self> {
        let (config, error) = Self::load(dir);
        if let Some(e) = error {
            out.emit(&Outbound::ConfigError(e.to_string()))?;
        }
        Ok(config)
    }

    pub fn ollama_base_url(&self, flag: Option<&str>) -> String {
        let env_value = std::env::var(OLLAMA_HOST_ENV).ok();
        resolve_ollama_url(flag, self.ollama_url.as_deref(), env_value.as_deref())
    }
}

/// Backend URL precedence: explicit flag, then `config.json`, then the
/// `OLLAMA_HOST` environment variable, then the local default.
pub fn resolve_ollama_url(
    flag: Option<&str>,
    config_value: Option<&str>,
    env_value: Option<&str>,
) -> String {
    [flag, config_value, env_value]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|url| !url.is_empty())
        .unwrap_or(DEFAULT_OLLAMA_URL)
        .to_string()
}

/// `<exe_dir>/../modelConfig`, independent of the working directory.
pub fn default_config_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe()
        .map_err(|e| BridgeError::ExecutableDir(e.to_string()))?;
    let exe_dir = exe
        .parent()
        .ok_or_else(|| BridgeError::ExecutableDir(exe.display().to_string()))?;

    Ok(exe_dir.join("..").join(CONFIG_DIR_NAME))
}
