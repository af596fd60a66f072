//! Core domain entities, errors, and seams for op-bruno.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors shared by every op-bruno component. All of them are fatal to a run.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A directory or file required to proceed does not exist.
    #[error("not found: {0}")]
    NotFound(PathBuf),
    /// Input is structurally inconsistent (mismatched markers, open blocks).
    #[error("malformed file {}: {reason}", path.display())]
    MalformedFile {
        /// File that failed to parse.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },
    /// The vault CLI is missing, not signed in, or a command failed.
    #[error("{command} failed: {message}")]
    ExternalTool {
        /// The command line that was attempted.
        command: String,
        /// Message reported by the tool.
        message: String,
    },
    /// The named vault cannot be reached.
    #[error("unable to access vault \"{vault}\": {message}")]
    VaultAccess {
        /// Vault name as given by the user.
        vault: String,
        /// Message reported by the tool.
        message: String,
    },
    /// An IO error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A serialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The pre-request script template failed to render.
    #[error("template error: {0}")]
    Template(String),
}

impl CoreError {
    /// Build a malformed-file error for the given path.
    pub fn malformed(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::MalformedFile {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Remediation hints shown to the user next to the error.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::NotFound(_) => vec![
                "Check that the path points at a Bruno collection directory".into(),
            ],
            Self::MalformedFile { path, .. } => vec![
                format!("Fix {} by hand and re-run; nothing was written", path.display()),
            ],
            Self::ExternalTool { .. } => vec![
                "Ensure that the 1Password CLI is installed: https://developer.1password.com/docs/cli".into(),
                "Sign in to the 1Password CLI (run: op signin)".into(),
            ],
            Self::VaultAccess { vault, .. } => vec![
                "Sign in to the 1Password CLI (run: op signin)".into(),
                format!("Make sure the vault \"{vault}\" exists and you have access to it"),
            ],
            Self::Io(_) | Self::Serialization(_) | Self::Template(_) => Vec::new(),
        }
    }
}

/// How the environment parser treats blocks left open at end of file.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// Fail with [`CoreError::MalformedFile`].
    #[default]
    Strict,
    /// Close the block and report a warning.
    Lenient,
}

/// A single variable from a Bruno environment file.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    /// Variable name, unique within its environment.
    pub name: String,
    /// Plain value, or the vault reference once extracted.
    pub value: Option<String>,
    /// False when the line was prefixed with `~`.
    pub enabled: bool,
    /// True when declared in the `vars:secret` block.
    pub is_secret: bool,
}

/// One environment file, parsed.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Environment {
    /// File stem of the environment file.
    pub name: String,
    /// Variables in file order.
    pub variables: Vec<Variable>,
}

impl Environment {
    /// Iterate over the variables declared as secret.
    pub fn secrets(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter().filter(|variable| variable.is_secret)
    }
}

/// Secret variables grouped by environment name.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SecretMap {
    environments: BTreeMap<String, Vec<Variable>>,
}

impl SecretMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the secrets of an environment, replacing any previous list.
    pub fn insert(&mut self, environment: impl Into<String>, secrets: Vec<Variable>) {
        self.environments.insert(environment.into(), secrets);
    }

    /// Secrets of a single environment.
    pub fn get(&self, environment: &str) -> Option<&[Variable]> {
        self.environments.get(environment).map(Vec::as_slice)
    }

    /// Iterate environments in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Variable])> {
        self.environments
            .iter()
            .map(|(name, secrets)| (name.as_str(), secrets.as_slice()))
    }

    /// Number of environments, including those without secrets.
    pub fn environment_count(&self) -> usize {
        self.environments.len()
    }

    /// Total number of secrets across all environments.
    pub fn secret_count(&self) -> usize {
        self.environments.values().map(Vec::len).sum()
    }

    /// Whether at least one environment declares a secret.
    pub fn has_secrets(&self) -> bool {
        self.environments.values().any(|secrets| !secrets.is_empty())
    }
}

/// Injected sink for user-facing progress messages.
pub trait Reporter {
    /// Report normal progress.
    fn info(&self, message: &str);
    /// Report a non-fatal condition.
    fn warn(&self, message: &str);
    /// Report a failure.
    fn error(&self, message: &str);
}

/// Severity of a recorded message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    /// Progress.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
}

/// Reporter that keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    messages: RefCell<Vec<(Level, String)>>,
}

impl RecordingReporter {
    /// Create an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages recorded at the given level, in order.
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.messages
            .borrow()
            .iter()
            .filter(|(recorded, _)| *recorded == level)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Shorthand for [`Level::Warn`] messages.
    pub fn warnings(&self) -> Vec<String> {
        self.messages(Level::Warn)
    }

    fn record(&self, level: Level, message: &str) {
        self.messages.borrow_mut().push((level, message.to_string()));
    }
}

impl Reporter for RecordingReporter {
    fn info(&self, message: &str) {
        self.record(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.record(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.record(Level::Error, message);
    }
}

/// A vault as returned by the vault CLI.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct VaultSummary {
    /// Opaque vault id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

/// A field stored on a vault item.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ItemField {
    /// Opaque field id.
    #[serde(default)]
    pub id: String,
    /// Field label, `<environment>/<variable>` for managed fields.
    #[serde(default)]
    pub label: String,
    /// Field type, e.g. `CONCEALED`.
    #[serde(rename = "type", default)]
    pub field_type: String,
    /// Field value, absent when not revealed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A vault item as returned by the vault CLI.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct VaultItem {
    /// Opaque item id.
    pub id: String,
    /// Item title.
    pub title: String,
    /// Vault holding the item.
    pub vault: VaultSummary,
    /// Item fields.
    #[serde(default)]
    pub fields: Vec<ItemField>,
}

impl VaultItem {
    /// Whether a field with this label already exists.
    pub fn has_field(&self, label: &str) -> bool {
        self.fields.iter().any(|field| field.label == label)
    }
}

/// A concealed field to create or overwrite on an item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldAssignment {
    /// Field label.
    pub label: String,
    /// Field value.
    pub value: String,
}

/// Vault collaborator reachable through an external CLI.
pub trait VaultClient {
    /// Fail with [`CoreError::ExternalTool`] when the CLI cannot be run.
    fn check_installed(&self) -> CoreResult<()>;
    /// Look up a vault by name.
    fn get_vault(&self, name: &str) -> CoreResult<VaultSummary>;
    /// Look up an item by title, `None` when it does not exist.
    fn get_item(&self, title: &str, vault: &str) -> CoreResult<Option<VaultItem>>;
    /// Create a new item holding the given fields.
    fn create_item(
        &self,
        vault: &str,
        title: &str,
        category: &str,
        fields: &[FieldAssignment],
    ) -> CoreResult<VaultItem>;
    /// Add or overwrite fields on an existing item.
    fn edit_item(&self, id: &str, fields: &[FieldAssignment]) -> CoreResult<VaultItem>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(name: &str) -> Variable {
        Variable {
            name: name.into(),
            value: None,
            enabled: true,
            is_secret: true,
        }
    }

    #[test]
    fn secret_map_counts_secrets_across_environments() {
        let mut map = SecretMap::new();
        map.insert("dev", vec![secret("API_KEY"), secret("TOKEN")]);
        map.insert("prod", vec![secret("API_KEY")]);
        map.insert("local", Vec::new());

        assert_eq!(map.environment_count(), 3);
        assert_eq!(map.secret_count(), 3);
        assert!(map.has_secrets());
        let names: Vec<_> = map.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["dev", "local", "prod"]);
    }

    #[test]
    fn secret_map_without_secrets() {
        let mut map = SecretMap::new();
        map.insert("local", Vec::new());
        assert!(!map.has_secrets());
    }

    #[test]
    fn recording_reporter_keeps_levels_apart() {
        let reporter = RecordingReporter::new();
        reporter.info("step");
        reporter.warn("careful");
        reporter.error("broken");
        assert_eq!(reporter.messages(Level::Info), ["step"]);
        assert_eq!(reporter.warnings(), ["careful"]);
        assert_eq!(reporter.messages(Level::Error), ["broken"]);
    }

    #[test]
    fn vault_access_suggestions_name_the_vault() {
        let err = CoreError::VaultAccess {
            vault: "Eng".into(),
            message: "denied".into(),
        };
        assert!(err.suggestions().iter().any(|hint| hint.contains("\"Eng\"")));
    }
}
