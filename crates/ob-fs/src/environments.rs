//! Bruno environment files and secret extraction.

use std::fs;
use std::path::{Path, PathBuf};

use ob_core::{CoreError, CoreResult, Environment, ParseMode, Reporter, SecretMap, Variable};
use ob_utils::{looks_like_secret, vault_reference};
use tracing::debug;
use walkdir::WalkDir;

/// Directory holding environment files, relative to the collection.
pub const ENVIRONMENTS_DIR_NAME: &str = "environments";

/// Extension of environment files.
pub const ENVIRONMENT_EXTENSION: &str = "bru";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Block {
    Vars,
    Secrets,
}

impl Block {
    fn opened_by(line: &str) -> Option<Self> {
        match line {
            "vars {" => Some(Self::Vars),
            "vars:secret [" => Some(Self::Secrets),
            _ => None,
        }
    }

    fn closed_by(line: &str) -> Option<Self> {
        match line {
            "}" => Some(Self::Vars),
            "]" => Some(Self::Secrets),
            _ => None,
        }
    }

    fn token(self) -> &'static str {
        match self {
            Self::Vars => "vars {",
            Self::Secrets => "vars:secret [",
        }
    }
}

/// Result of parsing one environment file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedEnvironment {
    /// The parsed environment.
    pub environment: Environment,
    /// Structural problems tolerated in lenient mode.
    pub recovered: Vec<String>,
}

/// Parse one environment file. The environment is named after the file stem.
pub fn parse_environment(path: &Path, content: &str, mode: ParseMode) -> CoreResult<ParsedEnvironment> {
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| CoreError::malformed(path, "file name is not valid UTF-8"))?
        .to_string();

    let mut open: Option<(Block, usize)> = None;
    let mut variables = Vec::new();
    let mut recovered = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let number = index + 1;
        let trimmed = line.trim();

        if let Some(block) = Block::opened_by(trimmed) {
            if let Some((current, opened_at)) = open {
                let problem = format!(
                    "line {number}: `{}` opened while `{}` from line {opened_at} is still open",
                    block.token(),
                    current.token()
                );
                let action = format!("switched to `{}`", block.token());
                tolerate(path, mode, problem, &action, &mut recovered)?;
            }
            open = Some((block, number));
            continue;
        }

        let Some((block, opened_at)) = open else {
            continue;
        };

        if let Some(closed) = Block::closed_by(trimmed) {
            if closed == block {
                open = None;
            } else {
                let problem = format!(
                    "line {number}: `{trimmed}` does not close `{}` from line {opened_at}",
                    block.token()
                );
                tolerate(path, mode, problem, "line ignored", &mut recovered)?;
            }
            continue;
        }

        if let Some(variable) = parse_variable(trimmed, block) {
            variables.push(variable);
        }
    }

    if let Some((block, opened_at)) = open {
        let problem = format!("`{}` opened on line {opened_at} is never closed", block.token());
        tolerate(path, mode, problem, "block closed at end of file", &mut recovered)?;
    }

    Ok(ParsedEnvironment {
        environment: Environment { name, variables },
        recovered,
    })
}

fn tolerate(
    path: &Path,
    mode: ParseMode,
    problem: String,
    action: &str,
    recovered: &mut Vec<String>,
) -> CoreResult<()> {
    match mode {
        ParseMode::Strict => Err(CoreError::malformed(path, problem)),
        ParseMode::Lenient => {
            recovered.push(format!("{problem}; {action}"));
            Ok(())
        }
    }
}

fn parse_variable(line: &str, block: Block) -> Option<Variable> {
    let line = line.strip_suffix(',').unwrap_or(line);
    let (enabled, line) = match line.strip_prefix('~') {
        Some(rest) => (false, rest),
        None => (true, line),
    };
    let (name, value) = match line.split_once(':') {
        Some((name, value)) => (name.trim(), Some(value.trim())),
        None => (line.trim(), None),
    };
    if name.is_empty() {
        return None;
    }

    let is_secret = block == Block::Secrets;
    Some(Variable {
        name: name.to_string(),
        value: if is_secret { None } else { value.map(str::to_string) },
        enabled,
        is_secret,
    })
}

/// The `environments` directory of a collection.
#[derive(Debug, Clone)]
pub struct EnvironmentsDir {
    root: PathBuf,
}

impl EnvironmentsDir {
    /// Locate the environments directory inside a collection.
    pub fn new(collection_dir: &Path) -> Self {
        Self {
            root: collection_dir.join(ENVIRONMENTS_DIR_NAME),
        }
    }

    /// Get the directory path.
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn files(&self) -> CoreResult<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Err(CoreError::NotFound(self.root.clone()));
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|err| CoreError::Io(err.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|ext| ext.to_str()) != Some(ENVIRONMENT_EXTENSION) {
                continue;
            }
            files.push(entry.into_path());
        }
        Ok(files)
    }

    /// Parse every environment file, sorted by file name.
    pub fn load(&self, mode: ParseMode, reporter: &dyn Reporter) -> CoreResult<Vec<Environment>> {
        let mut environments = Vec::new();
        for path in self.files()? {
            let content = fs::read_to_string(&path)?;
            let parsed = parse_environment(&path, &content, mode)?;
            for problem in &parsed.recovered {
                reporter.warn(&format!("{}: {problem}", path.display()));
            }

            let environment = parsed.environment;
            for variable in environment.variables.iter().filter(|variable| !variable.is_secret) {
                if looks_like_secret(&variable.name) {
                    reporter.warn(&format!(
                        "environment \"{}\": {} looks like a credential but is stored in plain vars; consider moving it to vars:secret",
                        environment.name, variable.name
                    ));
                }
            }

            debug!(
                environment = %environment.name,
                variables = environment.variables.len(),
                "parsed environment"
            );
            environments.push(environment);
        }
        Ok(environments)
    }
}

/// Keep only secret variables, replacing each value with its vault reference.
pub fn extract_secrets(environments: &[Environment], vault: &str, item: &str) -> SecretMap {
    let mut secrets = SecretMap::new();
    for environment in environments {
        let extracted = environment
            .secrets()
            .map(|variable| Variable {
                value: Some(vault_reference(vault, item, &environment.name, &variable.name)),
                ..variable.clone()
            })
            .collect();
        secrets.insert(environment.name.clone(), extracted);
    }
    secrets
}

#[cfg(test)]
mod tests {
    use super::*;
    use ob_core::RecordingReporter;
    use tempfile::TempDir;

    const EXAMPLE: &str = "vars {\n  API_URL: https://example.com\n}\nvars:secret [\n  API_KEY\n]\n";

    fn parse(content: &str, mode: ParseMode) -> CoreResult<ParsedEnvironment> {
        parse_environment(Path::new("environments/dev.bru"), content, mode)
    }

    #[test]
    fn parses_plain_and_secret_variables() {
        let parsed = parse(EXAMPLE, ParseMode::Strict).expect("parse");
        let environment = parsed.environment;

        assert_eq!(environment.name, "dev");
        assert_eq!(
            environment.variables,
            vec![
                Variable {
                    name: "API_URL".into(),
                    value: Some("https://example.com".into()),
                    enabled: true,
                    is_secret: false,
                },
                Variable {
                    name: "API_KEY".into(),
                    value: None,
                    enabled: true,
                    is_secret: true,
                },
            ]
        );
        assert!(parsed.recovered.is_empty());
    }

    #[test]
    fn example_extracts_reference() {
        let environment = parse(EXAMPLE, ParseMode::Strict).expect("parse").environment;
        let secrets = extract_secrets(&[environment], "Eng", "Secrets");
        let dev = secrets.get("dev").expect("dev secrets");

        assert_eq!(dev.len(), 1);
        assert_eq!(dev[0].name, "API_KEY");
        assert_eq!(dev[0].value.as_deref(), Some("vault://Eng/Secrets/dev/API_KEY"));
    }

    #[test]
    fn counts_variables_of_every_secret_block() {
        let content = "vars:secret [\n  A,\n  B\n]\nvars {\n  PLAIN: 1\n}\nvars:secret [\n  C\n]\n";
        let environment = parse(content, ParseMode::Strict).expect("parse").environment;
        let names: Vec<_> = environment.secrets().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["A", "B", "C"]);
        assert_eq!(environment.variables.len(), 4);
    }

    #[test]
    fn tilde_disables_and_commas_are_stripped() {
        let content = "vars:secret [\n  ~OLD_KEY,\n  NEW_KEY\n]\nvars {\n  ~DEBUG: true\n}\n";
        let environment = parse(content, ParseMode::Strict).expect("parse").environment;

        let flags: Vec<_> = environment
            .variables
            .iter()
            .map(|v| (v.name.as_str(), v.enabled))
            .collect();
        assert_eq!(flags, [("OLD_KEY", false), ("NEW_KEY", true), ("DEBUG", false)]);
    }

    #[test]
    fn value_keeps_everything_after_first_colon() {
        let content = "vars {\n  DSN: postgres://user:pw@localhost:5432/db\n}\n";
        let environment = parse(content, ParseMode::Strict).expect("parse").environment;
        assert_eq!(
            environment.variables[0].value.as_deref(),
            Some("postgres://user:pw@localhost:5432/db")
        );
    }

    #[test]
    fn blank_and_nameless_lines_are_skipped() {
        let content = "vars {\n\n  : orphan\n  HOST: localhost\n}\n";
        let environment = parse(content, ParseMode::Strict).expect("parse").environment;
        assert_eq!(environment.variables.len(), 1);
        assert_eq!(environment.variables[0].name, "HOST");
    }

    #[test]
    fn strict_mode_rejects_unterminated_block() {
        let result = parse("vars:secret [\n  API_KEY\n", ParseMode::Strict);
        assert!(matches!(result, Err(CoreError::MalformedFile { .. })));
    }

    #[test]
    fn lenient_mode_closes_unterminated_block() {
        let parsed = parse("vars:secret [\n  API_KEY\n", ParseMode::Lenient).expect("parse");
        assert_eq!(parsed.environment.variables.len(), 1);
        assert_eq!(parsed.recovered.len(), 1);
        assert!(parsed.recovered[0].ends_with("never closed; block closed at end of file"));
    }

    #[test]
    fn lenient_mode_names_each_recovery() {
        let content = "vars {\n  A: 1\n]\nvars:secret [\n  B\n]\n";
        let parsed = parse(content, ParseMode::Lenient).expect("parse");

        assert_eq!(parsed.recovered.len(), 2);
        assert!(parsed.recovered[0].contains("does not close"));
        assert!(parsed.recovered[0].ends_with("; line ignored"));
        assert!(parsed.recovered[1].ends_with("; switched to `vars:secret [`"));
        let secrets: Vec<_> = parsed.environment.secrets().map(|v| v.name.as_str()).collect();
        assert_eq!(secrets, ["B"]);
    }

    #[test]
    fn strict_errors_carry_no_recovery_action() {
        let err = parse("vars {\n  A: 1\n]\n}\n", ParseMode::Strict).expect_err("mismatched closer");
        let CoreError::MalformedFile { reason, .. } = err else {
            panic!("expected a malformed file error");
        };
        assert!(reason.contains("does not close"));
        assert!(!reason.contains("ignored"));
    }

    #[test]
    fn strict_mode_rejects_nested_open() {
        let result = parse("vars {\n  A: 1\nvars:secret [\n  B\n]\n", ParseMode::Strict);
        assert!(matches!(result, Err(CoreError::MalformedFile { .. })));
    }

    #[test]
    fn load_requires_environments_directory() {
        let temp = TempDir::new().expect("temp dir");
        let reporter = RecordingReporter::new();
        let result = EnvironmentsDir::new(temp.path()).load(ParseMode::Strict, &reporter);
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[test]
    fn load_reads_bru_files_in_name_order() {
        let temp = TempDir::new().expect("temp dir");
        let dir = temp.path().join(ENVIRONMENTS_DIR_NAME);
        fs::create_dir_all(&dir).expect("create dir");
        fs::write(dir.join("prod.bru"), EXAMPLE).expect("write prod");
        fs::write(dir.join("dev.bru"), EXAMPLE).expect("write dev");
        fs::write(dir.join("notes.txt"), "vars {\n}\n").expect("write notes");

        let reporter = RecordingReporter::new();
        let environments = EnvironmentsDir::new(temp.path())
            .load(ParseMode::Strict, &reporter)
            .expect("load");
        let names: Vec<_> = environments.iter().map(|env| env.name.as_str()).collect();
        assert_eq!(names, ["dev", "prod"]);
    }

    #[test]
    fn load_warns_about_plaintext_credentials_and_recovered_blocks() {
        let temp = TempDir::new().expect("temp dir");
        let dir = temp.path().join(ENVIRONMENTS_DIR_NAME);
        fs::create_dir_all(&dir).expect("create dir");
        fs::write(dir.join("dev.bru"), "vars {\n  AUTH_TOKEN: abc\n").expect("write dev");

        let reporter = RecordingReporter::new();
        EnvironmentsDir::new(temp.path())
            .load(ParseMode::Lenient, &reporter)
            .expect("load");
        let warnings = reporter.warnings();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.contains("never closed")));
        assert!(warnings.iter().any(|w| w.contains("AUTH_TOKEN")));
    }
}
