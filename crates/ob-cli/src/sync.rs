//! The `sync` pipeline: environments in, secrets file, config, vault item and script out.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ob_core::{CoreError, Reporter, VaultClient};
use ob_fs::{
    export_secrets, extract_secrets, render_pre_request_script, BrunoConfig, CollectionFile,
    EnvironmentsDir, ExportFormat, ManagedBlock, MergeOutcome, ScriptContext, Settings,
};
use ob_vault::{SyncOutcome, VaultSync, VerifyMode};
use tracing::debug;

/// What to do with the 1Password item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VaultMode {
    /// Leave 1Password alone.
    #[default]
    Skip,
    /// Only check that the vault is reachable; failures are warnings.
    Verify,
    /// Create the item or add its missing fields.
    Upsert,
}

/// One `sync` invocation.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    /// Collection directory.
    pub collection: PathBuf,
    /// Item title; defaults to the collection name.
    pub title: Option<String>,
    /// Resolved settings.
    pub settings: Settings,
    /// Vault behaviour.
    pub vault_mode: VaultMode,
}

/// What a completed run changed.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    /// Item title used for references and the script.
    pub title: String,
    /// Number of environments read.
    pub environments: usize,
    /// Number of secret variables found.
    pub secrets: usize,
    /// Where the secrets file was written.
    pub export_path: PathBuf,
    /// Format of the secrets file.
    pub export_format: ExportFormat,
    /// Whether `bruno.json` had to be changed.
    pub config_patched: bool,
    /// Vault result, when the item was upserted.
    pub vault: Option<SyncOutcome>,
    /// How the pre-request script was merged.
    pub collection: MergeOutcome,
}

fn item_title(collection: &Path, config: &BrunoConfig, title: Option<&str>) -> Result<String> {
    if let Some(title) = title.filter(|title| !title.trim().is_empty()) {
        return Ok(title.to_string());
    }
    if let Some(name) = config.name().context("failed to read the collection name")? {
        return Ok(name);
    }
    Ok(collection
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("bruno-collection")
        .to_string())
}

/// Run the whole pipeline. Returns `None` when there was nothing to sync.
///
/// Every step runs only if the previous one succeeded.
pub fn sync_collection(
    request: &SyncRequest,
    client: &dyn VaultClient,
    reporter: &dyn Reporter,
) -> Result<Option<SyncSummary>> {
    let collection = request.collection.as_path();
    if !collection.is_dir() {
        return Err(CoreError::NotFound(collection.to_path_buf()).into());
    }
    let settings = &request.settings;
    let config = BrunoConfig::new(collection);
    let title = item_title(collection, &config, request.title.as_deref())?;
    debug!(collection = %collection.display(), %title, vault = %settings.vault, "starting sync");

    let environments = EnvironmentsDir::new(collection)
        .load(settings.parse_mode, reporter)
        .context("failed to read environments")?;
    if environments.is_empty() {
        reporter.warn("No environments found in the collection");
        return Ok(None);
    }

    let secrets = extract_secrets(&environments, &settings.vault, &title);
    if !secrets.has_secrets() {
        reporter.warn("None of the environments found has a secret variable");
        reporter.info("Mark variables as secret in Bruno to move them to 1Password");
        return Ok(None);
    }
    reporter.info(&format!(
        "Found {} secret(s) across {} environment(s)",
        secrets.secret_count(),
        secrets.environment_count()
    ));

    let export_path = collection.join(&settings.out_name);
    let export_format = export_secrets(&secrets, &export_path).context("failed to write the secrets file")?;
    reporter.info(&format!("Secrets references saved to {}", export_path.display()));
    if export_format == ExportFormat::Yaml {
        reporter.warn("The pre-request script reads JSON; use a .json output name for Bruno to load the secrets");
    }

    let config_patched = config
        .ensure_script_access(reporter)
        .context("failed to update bruno.json")?;

    let vault = match request.vault_mode {
        VaultMode::Skip => {
            reporter.info("Skipping 1Password item creation (use --1password to enable)");
            None
        }
        VaultMode::Verify => {
            VaultSync::new(client, reporter).verify(&settings.vault, VerifyMode::WarnOnly)?;
            None
        }
        VaultMode::Upsert => {
            let sync = VaultSync::new(client, reporter);
            sync.verify(&settings.vault, VerifyMode::Enforce)?;
            Some(sync.upsert(&secrets, &settings.vault, &title)?)
        }
    };

    let script = render_pre_request_script(&ScriptContext {
        secrets_file: &settings.out_name,
        vault: &settings.vault,
        item: &title,
    })?;
    let merged = CollectionFile::new(collection).upsert(&ManagedBlock::new(&script), reporter)?;

    Ok(Some(SyncSummary {
        title,
        environments: environments.len(),
        secrets: secrets.secret_count(),
        export_path,
        export_format,
        config_patched,
        vault,
        collection: merged,
    }))
}
