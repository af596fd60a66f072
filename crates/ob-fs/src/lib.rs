//! Filesystem side of op-bruno: collection files and tool settings.

pub mod collection;
pub mod config_patch;
pub mod environments;
pub mod export;
pub mod template;

use std::fs;
use std::path::{Path, PathBuf};

use ob_core::{CoreError, CoreResult, ParseMode};
use serde::{Deserialize, Serialize};

pub use collection::{
    merge_script, CollectionDocument, CollectionFile, ManagedBlock, MergeOutcome,
    COLLECTION_FILE_NAME, PRE_REQUEST_SECTION,
};
pub use config_patch::{patch_document, BrunoConfig, CONFIG_FILE_NAME, REQUIRED_MODULES};
pub use environments::{extract_secrets, parse_environment, EnvironmentsDir, ParsedEnvironment};
pub use export::{export_secrets, render_secrets, ExportFormat, DEFAULT_OUT_NAME};
pub use template::{render_pre_request_script, ScriptContext};

/// Directory name used under the user config directory.
pub const TOOL_DIR_NAME: &str = "op-bruno";

/// Vault used when nothing else is configured.
pub const DEFAULT_VAULT: &str = "Employee";

const CONFIG_FILE_NAME_YAML: &str = "config.yaml";

/// Optional user defaults, read from `config.yaml`.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    /// Default vault name.
    pub vault: Option<String>,
    /// Default export file name.
    pub out_name: Option<String>,
    /// Default environment parse mode.
    pub parse_mode: Option<ParseMode>,
}

/// Values given on the command line, if any.
#[derive(Debug, Default, Clone)]
pub struct SettingsOverrides {
    /// `--vault`
    pub vault: Option<String>,
    /// `--out-name`
    pub out_name: Option<String>,
    /// `--lenient`
    pub parse_mode: Option<ParseMode>,
}

/// Effective settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Vault name.
    pub vault: String,
    /// Export file name, relative to the collection directory.
    pub out_name: String,
    /// Environment parse mode.
    pub parse_mode: ParseMode,
}

/// Resolve the config file location (`OP_BRUNO_CONFIG` wins over the default).
pub fn config_path() -> CoreResult<PathBuf> {
    if let Ok(value) = std::env::var("OP_BRUNO_CONFIG") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(TOOL_DIR_NAME).join(CONFIG_FILE_NAME_YAML));
    }
    Err(CoreError::NotFound(PathBuf::from(CONFIG_FILE_NAME_YAML)))
}

/// Load the user config; a missing file yields the defaults.
pub fn load_config() -> CoreResult<ToolConfig> {
    load_config_from(&config_path()?)
}

/// Load a config file from an explicit path.
pub fn load_config_from(path: &Path) -> CoreResult<ToolConfig> {
    if !path.exists() {
        return Ok(ToolConfig::default());
    }
    let contents = fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|err| CoreError::malformed(path, err.to_string()))
}

/// Combine flags, environment variables, the config file and defaults, in that order.
pub fn resolve_settings(
    overrides: SettingsOverrides,
    config: ToolConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let from_env = |key: &str| env(key).filter(|value| !value.trim().is_empty());

    Settings {
        vault: overrides
            .vault
            .or_else(|| from_env("OP_BRUNO_VAULT"))
            .or(config.vault)
            .unwrap_or_else(|| DEFAULT_VAULT.to_string()),
        out_name: overrides
            .out_name
            .or_else(|| from_env("OP_BRUNO_OUT_NAME"))
            .or(config.out_name)
            .unwrap_or_else(|| DEFAULT_OUT_NAME.to_string()),
        parse_mode: overrides.parse_mode.or(config.parse_mode).unwrap_or_default(),
    }
}
