//! Rendering of the managed pre-request script.

use minijinja::{context, Environment, UndefinedBehavior};
use ob_core::{CoreError, CoreResult};

const PRE_REQUEST_TEMPLATE: &str = include_str!("../templates/pre-request.js.j2");

/// Values substituted into the pre-request script.
#[derive(Clone, Copy, Debug)]
pub struct ScriptContext<'a> {
    /// Export file name, relative to the collection directory.
    pub secrets_file: &'a str,
    /// Vault holding the item.
    pub vault: &'a str,
    /// Item title.
    pub item: &'a str,
}

/// Render the script body that goes between the managed markers.
pub fn render_pre_request_script(script: &ScriptContext<'_>) -> CoreResult<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    // Values land inside JavaScript, so pass them as JSON string literals.
    let secrets_file = js_string(script.secrets_file)?;
    let vault = js_string(script.vault)?;
    let item = js_string(script.item)?;
    let ctx = context! { secrets_file, vault, item };
    env.render_str(PRE_REQUEST_TEMPLATE, ctx)
        .map_err(|err| CoreError::Template(err.to_string()))
}

fn js_string(value: &str) -> CoreResult<String> {
    serde_json::to_string(value).map_err(|err| CoreError::Serialization(err.to_string()))
}
