//! [`VaultClient`] backed by the 1Password `op` binary.

use std::io::Write;
use std::process::{Command, Stdio};

use ob_core::{CoreError, CoreResult, FieldAssignment, VaultClient, VaultItem, VaultSummary};
use serde::Serialize;
use tracing::debug;

/// Program name looked up on `PATH`.
pub const OP_PROGRAM: &str = "op";

enum Outcome {
    Success(String),
    Failure(String),
}

#[derive(Serialize)]
struct ItemTemplate<'a> {
    title: &'a str,
    category: &'a str,
    fields: [TemplateField; 1],
}

#[derive(Serialize)]
struct TemplateField {
    id: &'static str,
    label: &'static str,
    purpose: &'static str,
    #[serde(rename = "type")]
    field_type: &'static str,
    value: &'static str,
}

const NOTES_FIELD: TemplateField = TemplateField {
    id: "notesPlain",
    label: "notesPlain",
    purpose: "NOTES",
    field_type: "STRING",
    value: "",
};

/// Blocking client for the `op` CLI. Every call is one subprocess.
#[derive(Debug, Clone)]
pub struct OnePasswordCli {
    program: String,
}

impl Default for OnePasswordCli {
    fn default() -> Self {
        Self::new()
    }
}

impl OnePasswordCli {
    /// Use `op` from `PATH`.
    pub fn new() -> Self {
        Self::with_program(OP_PROGRAM)
    }

    /// Use a specific binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command_line(&self, args: &[String]) -> String {
        let mut line = self.program.clone();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn invoke(&self, args: &[String], stdin: Option<&str>) -> CoreResult<Outcome> {
        let command_line = self.command_line(args);
        debug!(command = %command_line, "running vault CLI");

        let mut command = Command::new(&self.program);
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        command.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });

        let spawned = command.spawn().and_then(|mut child| {
            if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(input.as_bytes())?;
            }
            child.wait_with_output()
        });
        let output = match spawned {
            Ok(output) => output,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::ExternalTool {
                    command: command_line,
                    message: format!("`{}` is not installed or not on PATH", self.program),
                });
            }
            Err(err) => {
                return Err(CoreError::ExternalTool {
                    command: command_line,
                    message: err.to_string(),
                });
            }
        };

        if output.status.success() {
            return Ok(Outcome::Success(String::from_utf8_lossy(&output.stdout).into_owned()));
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok(Outcome::Failure(if stderr.is_empty() {
            format!("exited with status {}", output.status)
        } else {
            stderr
        }))
    }

    fn run(&self, args: &[String], stdin: Option<&str>) -> CoreResult<String> {
        match self.invoke(args, stdin)? {
            Outcome::Success(stdout) => Ok(stdout),
            Outcome::Failure(message) => Err(CoreError::ExternalTool {
                command: self.command_line(args),
                message,
            }),
        }
    }
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

fn parse_json<T: serde::de::DeserializeOwned>(stdout: &str) -> CoreResult<T> {
    serde_json::from_str(stdout)
        .map_err(|err| CoreError::Serialization(format!("unexpected `op` output: {err}")))
}

/// Escape the characters `op` treats as syntax in an assignment label.
fn escape_label(label: &str) -> String {
    let mut escaped = String::with_capacity(label.len());
    for ch in label.chars() {
        if matches!(ch, '\\' | '.' | '=') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Render `label[concealed]=value` assignment arguments.
pub fn assignment_args(fields: &[FieldAssignment]) -> Vec<String> {
    fields
        .iter()
        .map(|field| format!("{}[concealed]={}", escape_label(&field.label), field.value))
        .collect()
}

fn is_missing_item(message: &str) -> bool {
    message.contains("isn't an item") || message.contains("not found")
}

impl VaultClient for OnePasswordCli {
    fn check_installed(&self) -> CoreResult<()> {
        let version = self.run(&args(&["--version"]), None)?;
        debug!(version = %version.trim(), "found vault CLI");
        Ok(())
    }

    fn get_vault(&self, name: &str) -> CoreResult<VaultSummary> {
        match self.invoke(&args(&["vault", "get", name, "--format", "json"]), None)? {
            Outcome::Success(stdout) => parse_json(&stdout),
            Outcome::Failure(message) => Err(CoreError::VaultAccess {
                vault: name.to_string(),
                message,
            }),
        }
    }

    fn get_item(&self, title: &str, vault: &str) -> CoreResult<Option<VaultItem>> {
        let command = args(&["item", "get", title, "--vault", vault, "--format", "json"]);
        match self.invoke(&command, None)? {
            Outcome::Success(stdout) => parse_json(&stdout).map(Some),
            Outcome::Failure(message) if is_missing_item(&message) => Ok(None),
            Outcome::Failure(message) => Err(CoreError::ExternalTool {
                command: self.command_line(&command),
                message,
            }),
        }
    }

    fn create_item(
        &self,
        vault: &str,
        title: &str,
        category: &str,
        fields: &[FieldAssignment],
    ) -> CoreResult<VaultItem> {
        let template = ItemTemplate {
            title,
            category,
            fields: [NOTES_FIELD],
        };
        let template =
            serde_json::to_string(&template).map_err(|err| CoreError::Serialization(err.to_string()))?;

        let mut command = args(&["item", "create", "--vault", vault, "--title", title, "--format", "json"]);
        command.extend(assignment_args(fields));
        parse_json(&self.run(&command, Some(&template))?)
    }

    fn edit_item(&self, id: &str, fields: &[FieldAssignment]) -> CoreResult<VaultItem> {
        let mut command = args(&["item", "edit", id, "--format", "json"]);
        command.extend(assignment_args(fields));
        parse_json(&self.run(&command, None)?)
    }
}
