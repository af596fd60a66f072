//! Shared helpers for op-bruno.

/// Scheme prefix of references written in place of secret values.
pub const VAULT_REFERENCE_SCHEME: &str = "vault://";

/// Marker line opening the managed pre-request block.
pub const START_MARKER: &str = "// === START: 1Password Secret Management ===";

/// Marker line closing the managed pre-request block.
pub const END_MARKER: &str = "// === END: 1Password Secret Management ===";

/// Build the reference that replaces a secret value in the export.
pub fn vault_reference(vault: &str, item: &str, environment: &str, variable: &str) -> String {
    format!("{VAULT_REFERENCE_SCHEME}{vault}/{item}/{environment}/{variable}")
}

/// Label of the vault field holding one environment's variable.
pub fn field_label(environment: &str, variable: &str) -> String {
    format!("{environment}/{variable}")
}

/// Basic heuristic for variable names that usually hold credentials.
pub fn looks_like_secret(name: &str) -> bool {
    let lowered = name.to_lowercase();
    let signals = [
        "api_key",
        "apikey",
        "secret",
        "token",
        "password",
        "passwd",
        "private_key",
        "client_secret",
        "access_key",
    ];
    signals.iter().any(|signal| lowered.contains(signal))
}
