//! Writing the extracted secret map to disk.

use std::fs;
use std::path::Path;

use ob_core::{CoreError, CoreResult, SecretMap};
use tracing::debug;

/// Default name of the export, written inside the collection directory.
pub const DEFAULT_OUT_NAME: &str = "op-secrets.json";

/// Serialization used for the export file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    /// Pretty-printed JSON.
    Json,
    /// YAML.
    Yaml,
}

impl ExportFormat {
    /// Pick the format from the file extension; anything but `.yml`/`.yaml` is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml") => {
                Self::Yaml
            }
            _ => Self::Json,
        }
    }
}

/// Render the secret map in the given format.
pub fn render_secrets(secrets: &SecretMap, format: ExportFormat) -> CoreResult<String> {
    match format {
        ExportFormat::Json => serde_json::to_string_pretty(secrets)
            .map(|mut json| {
                json.push('\n');
                json
            })
            .map_err(|err| CoreError::Serialization(err.to_string())),
        ExportFormat::Yaml => {
            serde_yaml::to_string(secrets).map_err(|err| CoreError::Serialization(err.to_string()))
        }
    }
}

/// Write the secret map to `path`, choosing the format from its extension.
pub fn export_secrets(secrets: &SecretMap, path: &Path) -> CoreResult<ExportFormat> {
    let format = ExportFormat::from_path(path);
    let contents = render_secrets(secrets, format)?;
    fs::write(path, contents)?;
    debug!(path = %path.display(), ?format, "exported secrets");
    Ok(format)
}
