//! In-memory [`VaultClient`] for tests and dry runs.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use ob_core::{
    CoreError, CoreResult, FieldAssignment, ItemField, VaultClient, VaultItem, VaultSummary,
};

/// Vaults and items kept in memory.
#[derive(Debug, Default)]
pub struct MemoryVault {
    installed: bool,
    vaults: RefCell<BTreeMap<String, Vec<VaultItem>>>,
    next_id: Cell<usize>,
}

impl MemoryVault {
    /// An installed CLI with no vaults.
    pub fn new() -> Self {
        Self {
            installed: true,
            ..Self::default()
        }
    }

    /// Simulate a machine without the CLI.
    pub fn not_installed() -> Self {
        Self::default()
    }

    /// Add an empty vault.
    #[must_use]
    pub fn with_vault(self, name: &str) -> Self {
        self.vaults.borrow_mut().entry(name.to_string()).or_default();
        self
    }

    /// Items currently stored in a vault.
    pub fn items(&self, vault: &str) -> Vec<VaultItem> {
        self.vaults.borrow().get(vault).cloned().unwrap_or_default()
    }

    fn ensure_installed(&self) -> CoreResult<()> {
        if self.installed {
            return Ok(());
        }
        Err(CoreError::ExternalTool {
            command: "op --version".into(),
            message: "`op` is not installed or not on PATH".into(),
        })
    }

    fn generate_id(&self, prefix: &str) -> String {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        format!("{prefix}-{id}")
    }

    fn apply(&self, item: &mut VaultItem, fields: &[FieldAssignment]) {
        for assignment in fields {
            if let Some(field) = item.fields.iter_mut().find(|field| field.label == assignment.label) {
                field.value = Some(assignment.value.clone());
                continue;
            }
            item.fields.push(ItemField {
                id: self.generate_id("field"),
                label: assignment.label.clone(),
                field_type: "CONCEALED".into(),
                value: Some(assignment.value.clone()),
            });
        }
    }
}

impl VaultClient for MemoryVault {
    fn check_installed(&self) -> CoreResult<()> {
        self.ensure_installed()
    }

    fn get_vault(&self, name: &str) -> CoreResult<VaultSummary> {
        self.ensure_installed()?;
        if self.vaults.borrow().contains_key(name) {
            return Ok(VaultSummary {
                id: format!("vault-{name}"),
                name: name.to_string(),
            });
        }
        Err(CoreError::VaultAccess {
            vault: name.to_string(),
            message: format!("\"{name}\" isn't a vault in this account"),
        })
    }

    fn get_item(&self, title: &str, vault: &str) -> CoreResult<Option<VaultItem>> {
        let summary = self.get_vault(vault)?;
        let vaults = self.vaults.borrow();
        Ok(vaults
            .get(&summary.name)
            .and_then(|items| items.iter().find(|item| item.title == title))
            .cloned())
    }

    fn create_item(
        &self,
        vault: &str,
        title: &str,
        _category: &str,
        fields: &[FieldAssignment],
    ) -> CoreResult<VaultItem> {
        let summary = self.get_vault(vault)?;
        let mut item = VaultItem {
            id: self.generate_id("item"),
            title: title.to_string(),
            vault: summary,
            fields: Vec::new(),
        };
        self.apply(&mut item, fields);
        self.vaults
            .borrow_mut()
            .entry(vault.to_string())
            .or_default()
            .push(item.clone());
        Ok(item)
    }

    fn edit_item(&self, id: &str, fields: &[FieldAssignment]) -> CoreResult<VaultItem> {
        self.ensure_installed()?;
        let mut vaults = self.vaults.borrow_mut();
        let item = vaults
            .values_mut()
            .flat_map(|items| items.iter_mut())
            .find(|item| item.id == id)
            .ok_or_else(|| CoreError::ExternalTool {
                command: format!("op item edit {id}"),
                message: format!("\"{id}\" isn't an item"),
            })?;
        self.apply(item, fields);
        Ok(item.clone())
    }
}
