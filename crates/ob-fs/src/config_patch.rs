//! Read-merge-write of the collection's `bruno.json`.

use std::fs;
use std::path::{Path, PathBuf};

use ob_core::{CoreError, CoreResult, Reporter};
use serde_json::{Map, Value};
use tracing::debug;

/// Name of the collection settings file.
pub const CONFIG_FILE_NAME: &str = "bruno.json";

/// Modules the generated script requires.
pub const REQUIRED_MODULES: &[&str] = &["child_process"];

/// The `bruno.json` of a collection.
#[derive(Debug, Clone)]
pub struct BrunoConfig {
    path: PathBuf,
}

impl BrunoConfig {
    /// Locate `bruno.json` inside a collection.
    pub fn new(collection_dir: &Path) -> Self {
        Self {
            path: collection_dir.join(CONFIG_FILE_NAME),
        }
    }

    /// Get the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole document. Unknown keys are kept in their original order.
    pub fn read(&self) -> CoreResult<Value> {
        if !self.path.is_file() {
            return Err(CoreError::NotFound(self.path.clone()));
        }
        let contents = fs::read_to_string(&self.path)?;
        let document: Value =
            serde_json::from_str(&contents).map_err(|err| CoreError::malformed(&self.path, err.to_string()))?;
        if !document.is_object() {
            return Err(CoreError::malformed(&self.path, "top level is not a JSON object"));
        }
        Ok(document)
    }

    /// The collection name, if set.
    pub fn name(&self) -> CoreResult<Option<String>> {
        let document = self.read()?;
        Ok(document
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
            .map(str::to_string))
    }

    /// Enable filesystem access and whitelist the required modules.
    ///
    /// Returns whether the file had to be rewritten.
    pub fn ensure_script_access(&self, reporter: &dyn Reporter) -> CoreResult<bool> {
        let mut document = self.read()?;
        let changed =
            patch_document(&mut document).map_err(|reason| CoreError::malformed(&self.path, reason))?;
        if !changed {
            reporter.info(&format!("{} already allows the pre-request script", self.path.display()));
            return Ok(false);
        }

        let mut contents =
            serde_json::to_string_pretty(&document).map_err(|err| CoreError::Serialization(err.to_string()))?;
        contents.push('\n');
        fs::write(&self.path, contents)?;
        debug!(path = %self.path.display(), "patched collection settings");
        reporter.info(&format!(
            "Whitelisted modules and enabled filesystem access in {}",
            self.path.display()
        ));
        Ok(true)
    }
}

/// Set `scripts.filesystemAccess.allow` and extend `scripts.moduleWhitelist`.
///
/// Existing whitelist entries keep their order; missing ones are appended.
pub fn patch_document(document: &mut Value) -> Result<bool, String> {
    let root = document
        .as_object_mut()
        .ok_or("top level is not a JSON object")?;
    let mut changed = false;

    if !root.contains_key("scripts") {
        root.insert("scripts".into(), Value::Object(Map::new()));
        changed = true;
    }
    let scripts = root
        .get_mut("scripts")
        .and_then(Value::as_object_mut)
        .ok_or("`scripts` is not a JSON object")?;

    if !scripts.contains_key("moduleWhitelist") {
        scripts.insert("moduleWhitelist".into(), Value::Array(Vec::new()));
        changed = true;
    }
    let modules = scripts
        .get_mut("moduleWhitelist")
        .and_then(Value::as_array_mut)
        .ok_or("`scripts.moduleWhitelist` is not an array")?;
    for &required in REQUIRED_MODULES {
        if !modules.iter().any(|module| module.as_str() == Some(required)) {
            modules.push(Value::from(required));
            changed = true;
        }
    }

    if !scripts.contains_key("filesystemAccess") {
        scripts.insert("filesystemAccess".into(), Value::Object(Map::new()));
    }
    let access = scripts
        .get_mut("filesystemAccess")
        .and_then(Value::as_object_mut)
        .ok_or("`scripts.filesystemAccess` is not a JSON object")?;
    if access.get("allow") != Some(&Value::Bool(true)) {
        access.insert("allow".into(), Value::Bool(true));
        changed = true;
    }

    Ok(changed)
}
