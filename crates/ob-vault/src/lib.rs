//! Synchronising extracted secrets with a 1Password item.

pub mod memory;
pub mod op_cli;

use std::collections::BTreeSet;

use ob_core::{CoreResult, FieldAssignment, Reporter, SecretMap, VaultClient};
use ob_utils::field_label;
use tracing::debug;

pub use memory::MemoryVault;
pub use op_cli::{OnePasswordCli, OP_PROGRAM};

/// Category of items created by the sync.
pub const ITEM_CATEGORY: &str = "API_CREDENTIAL";

/// Value stored in new fields; the real secret is filled in from 1Password itself.
pub const PLACEHOLDER_VALUE: &str = "to-be-replaced-with-real-secret";

/// How vault verification failures are handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyMode {
    /// Failures abort the run.
    Enforce,
    /// Failures are reported as warnings.
    WarnOnly,
}

/// What the upsert did to the item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new item was created with this many fields.
    Created {
        /// Item id.
        id: String,
        /// Number of managed fields.
        fields: usize,
    },
    /// Missing fields were added to the existing item.
    Updated {
        /// Item id.
        id: String,
        /// Labels of the added fields.
        added: Vec<String>,
    },
    /// The item already had every field.
    Unchanged {
        /// Item id.
        id: String,
    },
}

/// One placeholder field per `<environment>/<variable>` pair.
pub fn field_assignments(secrets: &SecretMap) -> Vec<FieldAssignment> {
    secrets
        .iter()
        .flat_map(|(environment, variables)| {
            variables.iter().map(move |variable| FieldAssignment {
                label: field_label(environment, &variable.name),
                value: PLACEHOLDER_VALUE.to_string(),
            })
        })
        .collect()
}

/// Creates or updates the vault item backing a collection.
pub struct VaultSync<'a> {
    client: &'a dyn VaultClient,
    reporter: &'a dyn Reporter,
}

impl<'a> VaultSync<'a> {
    /// Bind the sync to a client and a reporter.
    pub fn new(client: &'a dyn VaultClient, reporter: &'a dyn Reporter) -> Self {
        Self { client, reporter }
    }

    /// Check that the CLI works and the vault is reachable.
    ///
    /// Returns `Ok(false)` when a failure was downgraded to a warning.
    pub fn verify(&self, vault: &str, mode: VerifyMode) -> CoreResult<bool> {
        let result = self
            .client
            .check_installed()
            .and_then(|()| self.client.get_vault(vault));
        match (result, mode) {
            (Ok(summary), _) => {
                debug!(vault = %summary.name, id = %summary.id, "vault reachable");
                Ok(true)
            }
            (Err(err), VerifyMode::Enforce) => Err(err),
            (Err(err), VerifyMode::WarnOnly) => {
                self.reporter.warn(&err.to_string());
                for suggestion in err.suggestions() {
                    self.reporter.warn(&format!("  {suggestion}"));
                }
                Ok(false)
            }
        }
    }

    /// Make sure exactly one item titled `title` holds a field per secret.
    ///
    /// Existing field values are never overwritten and fields are never removed.
    pub fn upsert(&self, secrets: &SecretMap, vault: &str, title: &str) -> CoreResult<SyncOutcome> {
        self.client.check_installed()?;
        let desired = field_assignments(secrets);

        let Some(item) = self.client.get_item(title, vault)? else {
            self.reporter
                .info(&format!("Creating 1Password item \"{title}\" in vault \"{vault}\""));
            let item = self.client.create_item(vault, title, ITEM_CATEGORY, &desired)?;
            self.reporter
                .info(&format!("Created 1Password item \"{title}\" in vault \"{vault}\""));
            return Ok(SyncOutcome::Created {
                id: item.id,
                fields: desired.len(),
            });
        };

        self.reporter.info(&format!(
            "Updating 1Password item \"{}\" in vault \"{}\"",
            item.title, item.vault.name
        ));

        let desired_labels: BTreeSet<&str> = desired.iter().map(|field| field.label.as_str()).collect();
        for field in &item.fields {
            if field.label.contains('/') && !desired_labels.contains(field.label.as_str()) {
                self.reporter.warn(&format!(
                    "Field \"{}\" no longer matches a secret variable; remove it in 1Password if it is unused",
                    field.label
                ));
            }
        }

        let missing: Vec<FieldAssignment> = desired
            .into_iter()
            .filter(|field| !item.has_field(&field.label))
            .collect();
        if missing.is_empty() {
            self.reporter
                .info(&format!("1Password item \"{}\" already has every field", item.title));
            return Ok(SyncOutcome::Unchanged { id: item.id });
        }

        self.client.edit_item(&item.id, &missing)?;
        self.reporter.info(&format!(
            "Added {} field(s) to 1Password item \"{}\"",
            missing.len(),
            item.title
        ));
        Ok(SyncOutcome::Updated {
            id: item.id,
            added: missing.into_iter().map(|field| field.label).collect(),
        })
    }
}
