//! Multi-file response protocol.
//!
//! A generation response carries any number of file blocks followed by
//! exactly one completion marker:
//!
//! ```text
//! <kiln-file path="src/App.tsx">
//! ...content...
//! </kiln-file>
//! <kiln-done status="success"/>
//! ```
//!
//! or `<kiln-done status="failure">reason</kiln-done>`. A response without a
//! marker, with an unterminated block, or with a path that is absolute or
//! escapes the project root is a protocol violation as a whole.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path};
use std::sync::LazyLock;
use thiserror::Error;

static FILE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<kiln-file\s+path="([^"]*)"\s*>(.*?)</kiln-file>"#).unwrap()
});

static FILE_OPEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<kiln-file[\s>]").unwrap());

static DONE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<kiln-done\s+status="(success|failure)"\s*(?:/>|>(.*?)</kiln-done>)"#)
        .unwrap()
});

/// Directories generated code must never write into.
const PROTECTED_PREFIXES: [&str; 3] = [".kiln", "node_modules", ".git"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    /// Normalized relative path inside the project root
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Completion {
    Success,
    Failure { reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub files: Vec<GeneratedFile>,
    pub completion: Completion,
}

impl ParsedResponse {
    pub fn is_success(&self) -> bool {
        self.completion == Completion::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("Response has no completion marker")]
    MissingMarker,

    #[error("Response has {0} completion markers")]
    MultipleMarkers(usize),

    #[error("Unterminated file block")]
    UnterminatedFile,

    #[error("Invalid file path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("File '{0}' appears more than once")]
    DuplicatePath(String),
}

/// Parse a raw generation response.
pub fn parse_response(text: &str) -> Result<ParsedResponse, ProtocolViolation> {
    let markers: Vec<_> = DONE_REGEX.captures_iter(text).collect();
    let completion = match markers.as_slice() {
        [] => return Err(ProtocolViolation::MissingMarker),
        [cap] => match cap.get(1).map(|m| m.as_str()) {
            Some("success") => Completion::Success,
            _ => Completion::Failure {
                reason: cap
                    .get(2)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|r| !r.is_empty()),
            },
        },
        many => return Err(ProtocolViolation::MultipleMarkers(many.len())),
    };

    let opened = FILE_OPEN_REGEX.find_iter(text).count();
    let mut files = Vec::new();
    let mut seen = HashSet::new();

    for cap in FILE_REGEX.captures_iter(text) {
        let raw_path = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        let path = normalize_path(raw_path)?;
        if !seen.insert(path.clone()) {
            return Err(ProtocolViolation::DuplicatePath(path));
        }
        let content = cap.get(2).map(|m| m.as_str()).unwrap_or_default();
        files.push(GeneratedFile {
            path,
            content: clean_content(content),
        });
    }

    if files.len() != opened {
        return Err(ProtocolViolation::UnterminatedFile);
    }

    Ok(ParsedResponse { files, completion })
}

/// Validate and normalize a generated file path.
///
/// Rejects empty, absolute and parent-escaping paths, and anything inside
/// protected directories. `./` segments are dropped and separators unified.
pub fn normalize_path(raw: &str) -> Result<String, ProtocolViolation> {
    let invalid = |reason: &str| ProtocolViolation::InvalidPath {
        path: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty path"));
    }
    if trimmed.contains('\0') {
        return Err(invalid("contains NUL"));
    }
    let unified = trimmed.replace('\\', "/");
    if unified.starts_with('/') || unified.chars().nth(1) == Some(':') {
        return Err(invalid("absolute path"));
    }

    let mut parts = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("escapes the project root")),
            Component::RootDir | Component::Prefix(_) => return Err(invalid("absolute path")),
        }
    }
    if parts.is_empty() {
        return Err(invalid("empty path"));
    }
    if PROTECTED_PREFIXES.contains(&parts[0].as_str()) {
        return Err(invalid("protected directory"));
    }
    Ok(parts.join("/"))
}

/// Drop the newline after the opening tag and a wrapping code fence, if any.
fn clean_content(content: &str) -> String {
    let content = content
        .strip_prefix("\r\n")
        .or_else(|| content.strip_prefix('\n'))
        .unwrap_or(content);
    let trimmed = content.trim_end();
    if trimmed.trim_start().starts_with("```") && trimmed.ends_with("```") {
        let start = trimmed.find('\n').map(|i| i + 1).unwrap_or(trimmed.len());
        let end = trimmed.len() - 3;
        if start <= end {
            let mut inner = trimmed[start..end].to_string();
            if !inner.ends_with('\n') {
                inner.push('\n');
            }
            return inner;
        }
    }
    content.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_files_and_success() {
        let text = r#"Here you go.
<kiln-file path="src/App.tsx">
export default function App() { return <div/>; }
</kiln-file>
<kiln-file path="./src/main.tsx">
import App from './App';
</kiln-file>
<kiln-done status="success"/>"#;

        let parsed = parse_response(text).unwrap();
        assert!(parsed.is_success());
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.files[0].path, "src/App.tsx");
        assert_eq!(
            parsed.files[0].content,
            "export default function App() { return <div/>; }\n"
        );
        assert_eq!(parsed.files[1].path, "src/main.tsx");
    }

    #[test]
    fn test_missing_marker_is_violation() {
        let text = "<kiln-file path=\"src/App.tsx\">x</kiln-file>";
        assert_eq!(parse_response(text), Err(ProtocolViolation::MissingMarker));
    }

    #[test]
    fn test_failure_marker_with_reason() {
        let text = r#"<kiln-done status="failure">spec is contradictory</kiln-done>"#;
        let parsed = parse_response(text).unwrap();
        assert_eq!(
            parsed.completion,
            Completion::Failure {
                reason: Some("spec is contradictory".into())
            }
        );
    }

    #[test]
    fn test_failure_marker_self_closing() {
        let parsed = parse_response(r#"<kiln-done status="failure"/>"#).unwrap();
        assert_eq!(parsed.completion, Completion::Failure { reason: None });
    }

    #[test]
    fn test_multiple_markers_is_violation() {
        let text = r#"<kiln-done status="success"/><kiln-done status="success"/>"#;
        assert_eq!(parse_response(text), Err(ProtocolViolation::MultipleMarkers(2)));
    }

    #[test]
    fn test_escaping_path_rejects_whole_response() {
        let text = r#"<kiln-file path="src/ok.ts">a</kiln-file>
<kiln-file path="../outside.ts">b</kiln-file>
<kiln-done status="success"/>"#;
        assert!(matches!(
            parse_response(text),
            Err(ProtocolViolation::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_unterminated_block() {
        let text = r#"<kiln-file path="src/a.ts">a</kiln-file>
<kiln-file path="src/b.ts">never closed
<kiln-done status="success"/>"#;
        assert_eq!(parse_response(text), Err(ProtocolViolation::UnterminatedFile));
    }

    #[test]
    fn test_duplicate_path() {
        let text = r#"<kiln-file path="src/a.ts">1</kiln-file>
<kiln-file path="./src/a.ts">2</kiln-file>
<kiln-done status="success"/>"#;
        assert_eq!(
            parse_response(text),
            Err(ProtocolViolation::DuplicatePath("src/a.ts".into()))
        );
    }

    #[test]
    fn test_normalize_path_rules() {
        assert_eq!(normalize_path("src\\components\\Card.tsx").unwrap(), "src/components/Card.tsx");
        assert!(normalize_path("/etc/passwd").is_err());
        assert!(normalize_path("C:\\x.ts").is_err());
        assert!(normalize_path("src/../../x").is_err());
        assert!(normalize_path(".kiln/project.json").is_err());
        assert!(normalize_path("node_modules/react/index.js").is_err());
        assert!(normalize_path("  ").is_err());
        assert!(normalize_path("./").is_err());
    }

    #[test]
    fn test_code_fence_stripped() {
        let text = "<kiln-file path=\"src/a.ts\">\n```ts\nexport const a = 1;\n```\n</kiln-file>\n\
                    <kiln-done status=\"success\"/>";
        let parsed = parse_response(text).unwrap();
        assert_eq!(parsed.files[0].content, "export const a = 1;\n");
    }
}
