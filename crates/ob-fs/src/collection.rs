//! The collection-level `collection.bru` and the managed pre-request block.
//!
//! A document is a sequence of top-level sections:
//!
//! ```text
//! meta {
//!   name: payments
//! }
//!
//! script:pre-request {
//!   console.log("hi");
//! }
//! ```
//!
//! Headers and closing brackets sit at column 0; body lines are kept verbatim
//! so nested braces inside indented scripts never end a section. Merging edits
//! the raw lines in place, so blank lines, line endings and a missing final
//! newline outside the managed block survive untouched.

use std::fs;
use std::path::{Path, PathBuf};

use ob_core::{CoreError, CoreResult, Reporter};
use ob_utils::{END_MARKER, START_MARKER};
use tracing::debug;

/// Name of the collection-level file.
pub const COLLECTION_FILE_NAME: &str = "collection.bru";

/// Section holding the collection pre-request script.
pub const PRE_REQUEST_SECTION: &str = "script:pre-request";

const SCRIPT_INDENT: &str = "  ";

/// Bracket style of a section.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bracket {
    /// `name {` ... `}`
    Brace,
    /// `name [` ... `]`
    Square,
}

impl Bracket {
    fn open(self) -> char {
        match self {
            Self::Brace => '{',
            Self::Square => '[',
        }
    }

    fn close(self) -> &'static str {
        match self {
            Self::Brace => "}",
            Self::Square => "]",
        }
    }
}

/// One top-level section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    /// Header name, e.g. `meta` or `script:pre-request`.
    pub name: String,
    /// Bracket style.
    pub bracket: Bracket,
    /// Body lines, indentation included, line terminators stripped.
    pub body: Vec<String>,
    header_line: usize,
}

impl Section {
    fn parse_header(line: &str, header_line: usize) -> Option<Self> {
        if line.starts_with(char::is_whitespace) {
            return None;
        }
        let line = line.trim_end();
        let (name, bracket) = if let Some(name) = line.strip_suffix(" {") {
            (name, Bracket::Brace)
        } else if let Some(name) = line.strip_suffix(" [") {
            (name, Bracket::Square)
        } else {
            return None;
        };
        if name.is_empty() || name.contains(char::is_whitespace) {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            bracket,
            body: Vec::new(),
            header_line,
        })
    }

    /// Index of the first body line in the document.
    fn body_start(&self) -> usize {
        self.header_line + 1
    }
}

fn strip_terminator(raw: &str) -> &str {
    let line = raw.strip_suffix('\n').unwrap_or(raw);
    line.strip_suffix('\r').unwrap_or(line)
}

/// In-memory view of `collection.bru`.
///
/// The raw lines are kept with their terminators, so rendering an unedited
/// document gives back the exact input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionDocument {
    lines: Vec<String>,
    sections: Vec<Section>,
    newline: &'static str,
}

impl CollectionDocument {
    /// Parse a document; every section must be closed before end of file.
    pub fn parse(content: &str) -> Result<Self, String> {
        let lines: Vec<String> = content.split_inclusive('\n').map(str::to_string).collect();
        let newline = if content.contains("\r\n") { "\r\n" } else { "\n" };
        let mut sections = Vec::new();
        let mut open: Option<Section> = None;

        for (index, raw) in lines.iter().enumerate() {
            let line = strip_terminator(raw);
            match open.take() {
                Some(section) if line.trim_end() == section.bracket.close() => {
                    sections.push(section);
                }
                Some(mut section) => {
                    section.body.push(line.to_string());
                    open = Some(section);
                }
                None if line.trim().is_empty() => {}
                None => {
                    let section = Section::parse_header(line, index).ok_or_else(|| {
                        format!("line {}: expected a section header, found `{}`", index + 1, line.trim())
                    })?;
                    open = Some(section);
                }
            }
        }

        if let Some(section) = open {
            return Err(format!(
                "section `{}` opened on line {} is never closed",
                section.name,
                section.header_line + 1
            ));
        }
        Ok(Self {
            lines,
            sections,
            newline,
        })
    }

    /// Serialize back to text. Lines never touched by a merge are byte-identical.
    pub fn render(&self) -> String {
        self.lines.concat()
    }

    /// All sections in file order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// First section with the given name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.name == name)
    }
}

/// Generated script wrapped in the start and end markers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagedBlock {
    lines: Vec<String>,
}

impl ManagedBlock {
    /// Wrap a script body in the markers.
    pub fn new(script: &str) -> Self {
        let mut lines = vec![START_MARKER.to_string()];
        lines.extend(script.lines().map(str::to_string));
        lines.push(END_MARKER.to_string());
        Self { lines }
    }

    /// Block lines, markers included, without section indentation.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Indented block lines, each ending with `newline`.
    fn terminated(&self, newline: &str) -> Vec<String> {
        self.lines
            .iter()
            .map(|line| {
                if line.is_empty() {
                    newline.to_string()
                } else {
                    format!("{SCRIPT_INDENT}{line}{newline}")
                }
            })
            .collect()
    }

    fn section_text(&self, newline: &str) -> String {
        let mut text = format!("{PRE_REQUEST_SECTION} {}{newline}", Bracket::Brace.open());
        text.extend(self.terminated(newline));
        text.push_str(Bracket::Brace.close());
        text.push_str(newline);
        text
    }
}

/// Which branch of the merge was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No file existed; a document with only the script section was created.
    Created,
    /// The document had no pre-request script, or only an empty section.
    Added,
    /// A user script existed without markers; the block was put above it.
    Prepended,
    /// The previous managed block was replaced in place.
    Replaced,
}

/// Merge the managed block into the pre-request section of `existing`.
///
/// Only the lines of the marked range (or the inserted block) change; every
/// other byte, line endings included, is kept as it was.
pub fn merge_script(
    existing: Option<CollectionDocument>,
    block: &ManagedBlock,
) -> Result<(CollectionDocument, MergeOutcome), String> {
    let Some(document) = existing else {
        let document = CollectionDocument::parse(&block.section_text("\n"))?;
        return Ok((document, MergeOutcome::Created));
    };
    let newline = document.newline;

    let Some(section) = document.section(PRE_REQUEST_SECTION) else {
        let mut text = document.render();
        match document.lines.last() {
            Some(last) if !last.ends_with('\n') => {
                text.push_str(newline);
                text.push_str(newline);
            }
            Some(last) if !last.trim().is_empty() => text.push_str(newline),
            _ => {}
        }
        text.push_str(&block.section_text(newline));
        return Ok((CollectionDocument::parse(&text)?, MergeOutcome::Added));
    };

    let start = section.body_start();
    let (range, outcome) = if section.body.iter().all(|line| line.trim().is_empty()) {
        (start..start, MergeOutcome::Added)
    } else {
        match locate_markers(&section.body)? {
            Some((first, last)) => (start + first..start + last + 1, MergeOutcome::Replaced),
            None => (start..start, MergeOutcome::Prepended),
        }
    };

    let mut replacement = block.terminated(newline);
    if outcome == MergeOutcome::Prepended {
        replacement.push(newline.to_string());
    }
    let mut lines = document.lines;
    let tail = lines.split_off(range.end);
    lines.truncate(range.start);
    lines.extend(replacement);
    lines.extend(tail);

    Ok((CollectionDocument::parse(&lines.concat())?, outcome))
}

fn locate_markers(body: &[String]) -> Result<Option<(usize, usize)>, String> {
    let positions = |marker: &str| -> Vec<usize> {
        body.iter()
            .enumerate()
            .filter(|(_, line)| line.trim() == marker)
            .map(|(index, _)| index)
            .collect()
    };
    let starts = positions(START_MARKER);
    let ends = positions(END_MARKER);

    match (starts.as_slice(), ends.as_slice()) {
        ([], []) => Ok(None),
        ([start], [end]) if start < end => Ok(Some((*start, *end))),
        ([start], [end]) => Err(format!(
            "end marker on script line {} comes before start marker on script line {}",
            end + 1,
            start + 1
        )),
        ([_], []) => Err("start marker has no matching end marker".into()),
        ([], [_]) => Err("end marker has no matching start marker".into()),
        _ => Err(format!(
            "expected one managed block, found {} start and {} end markers",
            starts.len(),
            ends.len()
        )),
    }
}

/// The `collection.bru` of a collection.
#[derive(Debug, Clone)]
pub struct CollectionFile {
    path: PathBuf,
}

impl CollectionFile {
    /// Locate `collection.bru` inside a collection.
    pub fn new(collection_dir: &Path) -> Self {
        Self {
            path: collection_dir.join(COLLECTION_FILE_NAME),
        }
    }

    /// Get the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create or update the managed block. Nothing is written on error.
    pub fn upsert(&self, block: &ManagedBlock, reporter: &dyn Reporter) -> CoreResult<MergeOutcome> {
        let original = if self.path.exists() {
            Some(fs::read_to_string(&self.path)?)
        } else {
            None
        };
        let existing = original
            .as_deref()
            .map(CollectionDocument::parse)
            .transpose()
            .map_err(|reason| CoreError::malformed(&self.path, reason))?;
        let (document, outcome) =
            merge_script(existing, block).map_err(|reason| CoreError::malformed(&self.path, reason))?;
        debug!(path = %self.path.display(), ?outcome, "merged pre-request script");

        match outcome {
            MergeOutcome::Created => {
                reporter.info(&format!("Creating {}", self.path.display()));
            }
            MergeOutcome::Added => {
                reporter.info(&format!("Adding a pre-request script to {}", self.path.display()));
            }
            MergeOutcome::Prepended => {
                reporter.warn("Pre-request script already exists; the managed block was added above it");
                reporter.warn(&format!("Please review the modifications at: {}", self.path.display()));
            }
            MergeOutcome::Replaced => {
                reporter.info(&format!("Refreshing the managed block in {}", self.path.display()));
            }
        }

        let rendered = document.render();
        if original.as_deref() == Some(rendered.as_str()) {
            debug!(path = %self.path.display(), "collection unchanged");
            return Ok(outcome);
        }
        fs::write(&self.path, rendered)?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ob_core::RecordingReporter;
    use tempfile::TempDir;

    fn block() -> ManagedBlock {
        ManagedBlock::new("const secret = 1;\n\nbru.setEnvVar(\"A\", secret);\n")
    }

    fn merge_text(content: Option<&str>, block: &ManagedBlock) -> Result<(String, MergeOutcome), String> {
        let existing = content.map(CollectionDocument::parse).transpose()?;
        let (document, outcome) = merge_script(existing, block)?;
        Ok((document.render(), outcome))
    }

    #[test]
    fn parse_and_render_round_trip() {
        let content = "meta {\n  name: payments\n  type: collection\n}\n\nscript:pre-request {\n  if (a) {\n    b();\n  }\n}\n\ndocs {\n  # Notes\n\n  Some text\n}\n";
        let document = CollectionDocument::parse(content).expect("parse");
        assert_eq!(document.sections().len(), 3);
        assert_eq!(document.render(), content);
    }

    #[test]
    fn parse_rejects_unclosed_section() {
        let result = CollectionDocument::parse("meta {\n  name: x\n");
        assert!(result.expect_err("malformed").contains("never closed"));
    }

    #[test]
    fn parse_rejects_stray_text() {
        assert!(CollectionDocument::parse("name: x\n").is_err());
    }

    #[test]
    fn create_when_missing() {
        let (rendered, outcome) = merge_text(None, &block()).expect("merge");
        assert_eq!(outcome, MergeOutcome::Created);
        insta::assert_snapshot!(rendered, @r###"
        script:pre-request {
          // === START: 1Password Secret Management ===
          const secret = 1;

          bru.setEnvVar("A", secret);
          // === END: 1Password Secret Management ===
        }
        "###);
    }

    #[test]
    fn add_section_keeps_other_sections() {
        let content = "meta {\n  name: payments\n}\n";
        let (rendered, outcome) = merge_text(Some(content), &block()).expect("merge");
        assert_eq!(outcome, MergeOutcome::Added);
        assert!(rendered.starts_with(content));
        assert!(rendered.contains("\n\nscript:pre-request {\n"));
    }

    #[test]
    fn prepend_above_user_script() {
        let content = "script:pre-request {\n  console.log(\"mine\");\n}\n";
        let (rendered, outcome) = merge_text(Some(content), &block()).expect("merge");
        assert_eq!(outcome, MergeOutcome::Prepended);
        insta::assert_snapshot!(rendered, @r###"
        script:pre-request {
          // === START: 1Password Secret Management ===
          const secret = 1;

          bru.setEnvVar("A", secret);
          // === END: 1Password Secret Management ===

          console.log("mine");
        }
        "###);
    }

    #[test]
    fn replace_in_place_keeps_surrounding_lines() {
        let content = format!(
            "script:pre-request {{\n  const before = 1;\n  {START_MARKER}\n  old();\n  {END_MARKER}\n  const after = 2;\n}}\n"
        );
        let (rendered, outcome) = merge_text(Some(content.as_str()), &block()).expect("merge");
        assert_eq!(outcome, MergeOutcome::Replaced);

        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines[1], "  const before = 1;");
        assert_eq!(lines[2], format!("  {START_MARKER}"));
        assert_eq!(lines[lines.len() - 3], format!("  {END_MARKER}"));
        assert_eq!(lines[lines.len() - 2], "  const after = 2;");
        assert!(!rendered.contains("old();"));
    }

    #[test]
    fn replace_leaves_other_sections_byte_identical() {
        let replaced = ManagedBlock::new("new();");
        let lf = format!(
            "meta {{\n  name: payments\n}}\n\n\nscript:pre-request {{\n  {START_MARKER}\n  old();\n  {END_MARKER}\n}}\n\ndocs {{\n  hi\n}}"
        );
        let crlf = lf.replace('\n', "\r\n");

        for content in [lf, crlf] {
            let (rendered, outcome) = merge_text(Some(content.as_str()), &replaced).expect("merge");
            assert_eq!(outcome, MergeOutcome::Replaced);
            assert_eq!(rendered, content.replace("old();", "new();"));
        }
    }

    #[test]
    fn crlf_documents_keep_crlf_when_prepending() {
        let content = "meta {\r\n  name: payments\r\n}\r\n\r\nscript:pre-request {\r\n  mine();\r\n}\r\n";
        let (rendered, outcome) = merge_text(Some(content), &block()).expect("merge");
        assert_eq!(outcome, MergeOutcome::Prepended);
        assert!(rendered.starts_with("meta {\r\n  name: payments\r\n}\r\n\r\nscript:pre-request {\r\n"));
        assert!(rendered.ends_with("\r\n\r\n  mine();\r\n}\r\n"));
        assert_eq!(rendered.matches('\n').count(), rendered.matches("\r\n").count());
    }

    #[test]
    fn add_after_unterminated_last_line() {
        let content = "docs {\n  hi\n}";
        let (rendered, outcome) = merge_text(Some(content), &block()).expect("merge");
        assert_eq!(outcome, MergeOutcome::Added);
        assert!(rendered.starts_with("docs {\n  hi\n}\n\nscript:pre-request {\n"));
    }

    #[test]
    fn empty_script_section_counts_as_added() {
        let (created, _) = merge_text(None, &block()).expect("create");
        let (rendered, outcome) = merge_text(Some("script:pre-request {\n}\n"), &block()).expect("merge");
        assert_eq!(outcome, MergeOutcome::Added);
        assert_eq!(rendered, created);

        let (_, outcome) = merge_text(Some("script:pre-request {\n  \n}\n"), &block()).expect("merge");
        assert_eq!(outcome, MergeOutcome::Added);
    }

    #[test]
    fn upsert_into_empty_section_does_not_warn() {
        let temp = TempDir::new().expect("temp dir");
        let file = CollectionFile::new(temp.path());
        fs::write(file.path(), "script:pre-request {\n}\n").expect("write");

        let reporter = RecordingReporter::new();
        assert_eq!(file.upsert(&block(), &reporter).expect("merge"), MergeOutcome::Added);
        assert!(reporter.warnings().is_empty());
    }

    #[test]
    fn merge_is_idempotent() {
        let content = "meta {\n  name: payments\n}\n\nscript:pre-request {\n  console.log(\"mine\");\n}\n";
        let (once, _) = merge_text(Some(content), &block()).expect("first merge");
        let (twice, outcome) = merge_text(Some(once.as_str()), &block()).expect("second merge");
        assert_eq!(outcome, MergeOutcome::Replaced);
        assert_eq!(once, twice);
    }

    #[test]
    fn end_before_start_is_malformed() {
        let content = format!("script:pre-request {{\n  {END_MARKER}\n  {START_MARKER}\n}}\n");
        let err = merge_text(Some(content.as_str()), &block()).expect_err("malformed");
        assert!(err.contains("comes before"));
    }

    #[test]
    fn single_marker_is_malformed() {
        let content = format!("script:pre-request {{\n  {START_MARKER}\n  a();\n}}\n");
        assert!(merge_text(Some(content.as_str()), &block()).is_err());
        let content = format!("script:pre-request {{\n  a();\n  {END_MARKER}\n}}\n");
        assert!(merge_text(Some(content.as_str()), &block()).is_err());
    }

    #[test]
    fn upsert_twice_on_missing_file_writes_one_block() {
        let temp = TempDir::new().expect("temp dir");
        let file = CollectionFile::new(temp.path());
        let reporter = RecordingReporter::new();

        assert_eq!(file.upsert(&block(), &reporter).expect("create"), MergeOutcome::Created);
        let first = fs::read_to_string(file.path()).expect("read");
        assert_eq!(file.upsert(&block(), &reporter).expect("replace"), MergeOutcome::Replaced);
        let second = fs::read_to_string(file.path()).expect("read");

        assert_eq!(first, second);
        assert_eq!(second.matches(START_MARKER).count(), 1);
        assert_eq!(second.matches(END_MARKER).count(), 1);
    }

    #[test]
    fn upsert_does_not_write_malformed_file() {
        let temp = TempDir::new().expect("temp dir");
        let file = CollectionFile::new(temp.path());
        let content = format!("script:pre-request {{\n  {END_MARKER}\n  user();\n  {START_MARKER}\n}}\n");
        fs::write(file.path(), &content).expect("write");

        let result = file.upsert(&block(), &RecordingReporter::new());
        assert!(matches!(result, Err(CoreError::MalformedFile { .. })));
        assert_eq!(fs::read_to_string(file.path()).expect("read"), content);
    }

    #[test]
    fn upsert_warns_when_user_script_exists() {
        let temp = TempDir::new().expect("temp dir");
        let file = CollectionFile::new(temp.path());
        fs::write(file.path(), "script:pre-request {\n  mine();\n}\n").expect("write");

        let reporter = RecordingReporter::new();
        assert_eq!(file.upsert(&block(), &reporter).expect("merge"), MergeOutcome::Prepended);
        assert_eq!(reporter.warnings().len(), 2);
    }
}
