//! Rule-based classification of build and runtime diagnostics.
//!
//! Maps raw process output onto a closed taxonomy:
//! - `dependency`: install failures and unresolvable packages
//! - `type-check`: TypeScript compiler diagnostics
//! - `bundler`: Vite/esbuild transform and parse failures
//! - `runtime`: uncaught exceptions from the running app
//! - `unknown`: an error-looking line no rule recognized
//!
//! Rules are tried per line in that priority order. Each record carries a
//! suggestion and an auto-fixable flag which the corrective prompt surfaces.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Number of lines following a match kept as raw diagnostic context.
const CONTEXT_LINES: usize = 3;

static NPM_ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*npm (?:ERR!|error)\s*(.*)$").unwrap());

static MISSING_MODULE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        concat!(
            r#"(?:Cannot find module|Can't resolve|Failed to resolve import|Could not resolve)"#,
            r#"\s+['"]([^'"]+)['"]"#,
        ),
    )
    .unwrap()
});

static ERESOLVE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(ERESOLVE|E404|ETARGET)\b").unwrap());

static TS_ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"error (TS\d{4,5}):\s*(.*)$").unwrap());

static BUNDLER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        concat!(
            r"(?i)(\[plugin:[^\]]+\]|pre-transform error|transform failed|failed to parse source",
            r"|unexpected token|unterminated|expected .+ but found|\[vite\].*error|build failed",
            r"|\[postcss\])",
        ),
    )
    .unwrap()
});

static RUNTIME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        concat!(
            r"(?:Uncaught\s+(?:\(in promise\)\s+)?)?",
            r"\b(TypeError|ReferenceError|RangeError|SyntaxError|Error):\s*(.+)$",
        ),
    )
    .unwrap()
});

static UNCAUGHT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(uncaught|unhandled runtime error|unhandled rejection)").unwrap()
});

static NOT_DEFINED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\S+) is not defined").unwrap());

static READ_PROPS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Cannot read propert(?:y|ies) of (undefined|null)(?: \(reading '([^']+)'\))?")
        .unwrap()
});

static NOT_A_FUNCTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\S+) is not a function").unwrap());

static RENDER_LOOP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(too many re-renders|maximum update depth exceeded)").unwrap()
});

static PAREN_LOCATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\w./@-]+\.(?:tsx?|jsx?|mjs|cjs|css|json))\((\d+),(\d+)\)").unwrap()
});

static COLON_LOCATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?:\bat\s+(?:\S+\s+\()?)?",
        r"([\w./@-]+\.(?:tsx?|jsx?|mjs|cjs|css|json)):(\d+)(?::(\d+))?",
    ))
    .unwrap()
});

static URL_ORIGIN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^/\s]+/").unwrap());

/// Closed error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Dependency,
    TypeCheck,
    Bundler,
    Runtime,
    Unknown,
}

impl ErrorCategory {
    /// Static auto-fixable default for the category.
    pub fn default_auto_fixable(&self) -> bool {
        match self {
            ErrorCategory::Dependency | ErrorCategory::TypeCheck | ErrorCategory::Bundler => true,
            ErrorCategory::Runtime | ErrorCategory::Unknown => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Dependency => "dependency",
            ErrorCategory::TypeCheck => "type-check",
            ErrorCategory::Bundler => "bundler",
            ErrorCategory::Runtime => "runtime",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One classified diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub suggestion: String,
    pub auto_fixable: bool,
    /// The matching line plus a few lines of context
    pub raw: String,
}

impl ErrorRecord {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            file: None,
            line: None,
            column: None,
            suggestion: default_suggestion(category).to_string(),
            auto_fixable: category.default_auto_fixable(),
            raw: String::new(),
        }
    }

    /// An `unknown` record carrying a free-form diagnosis.
    pub fn unknown(message: impl Into<String>) -> Self {
        let message = message.into();
        let mut record = Self::new(ErrorCategory::Unknown, message.clone());
        record.raw = message;
        record
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = raw.into();
        self
    }

    /// `file:line:col` if a location was extracted.
    pub fn location(&self) -> Option<String> {
        let file = self.file.as_ref()?;
        Some(match (self.line, self.column) {
            (Some(l), Some(c)) => format!("{}:{}:{}", file, l, c),
            (Some(l), None) => format!("{}:{}", file, l),
            _ => file.clone(),
        })
    }

    fn dedup_key(&self) -> (ErrorCategory, String, Option<String>, Option<u32>, Option<u32>) {
        (
            self.category,
            self.message.clone(),
            self.file.clone(),
            self.line,
            self.column,
        )
    }
}

fn default_suggestion(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Dependency => {
            "Add the missing package to package.json or fix the import specifier"
        }
        ErrorCategory::TypeCheck => "Fix the type error at the reported location",
        ErrorCategory::Bundler => "Fix the syntax or import that the bundler could not transform",
        ErrorCategory::Runtime => "Inspect the component that throws at render time",
        ErrorCategory::Unknown => "Review the output and regenerate the affected files",
    }
}

/// Deterministic classifier over raw diagnostic text.
pub struct ErrorClassifier {
    /// Whether to log classification details (verbose mode)
    verbose: bool,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ErrorClassifier {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Classify every recognizable diagnostic in `text`.
    ///
    /// Records are de-duplicated by category, message and location. An
    /// `unknown` record is only produced when no rule matched anywhere.
    pub fn classify(&self, text: &str) -> Vec<ErrorRecord> {
        let lines: Vec<&str> = text.lines().collect();
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut first_unknown: Option<ErrorRecord> = None;

        for (idx, line) in lines.iter().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let raw = context_window(&lines, idx);

            match self.classify_line(trimmed) {
                Some(mut record) => {
                    record.raw = raw;
                    if record.file.is_none() {
                        // Stack frames usually follow the message line.
                        for next in lines.iter().skip(idx + 1).take(CONTEXT_LINES) {
                            apply_location(&mut record, next);
                            if record.file.is_some() {
                                break;
                            }
                        }
                    }
                    if seen.insert(record.dedup_key()) {
                        if self.verbose {
                            tracing::debug!(
                                category = %record.category,
                                message = %record.message,
                                "classified diagnostic"
                            );
                        }
                        records.push(record);
                    }
                }
                None => {
                    if first_unknown.is_none() && trimmed.to_lowercase().contains("error") {
                        let mut record = ErrorRecord::new(ErrorCategory::Unknown, trimmed);
                        apply_location(&mut record, trimmed);
                        record.raw = raw;
                        first_unknown = Some(record);
                    }
                }
            }
        }

        if records.is_empty()
            && let Some(record) = first_unknown
        {
            records.push(record);
        }
        records
    }

    /// Classify `text`, falling back to a single `unknown` record carrying `diagnosis`.
    pub fn classify_or_unknown(&self, text: &str, diagnosis: &str) -> Vec<ErrorRecord> {
        let records = self.classify(text);
        if records.is_empty() {
            let message = if diagnosis.trim().is_empty() {
                "Verification reported the preview as broken without a diagnosis".to_string()
            } else {
                diagnosis.trim().to_string()
            };
            return vec![ErrorRecord::unknown(message)];
        }
        records
    }

    fn classify_line(&self, line: &str) -> Option<ErrorRecord> {
        self.match_dependency(line)
            .or_else(|| self.match_type_check(line))
            .or_else(|| self.match_bundler(line))
            .or_else(|| self.match_runtime(line))
            .map(|mut record| {
                if record.file.is_none() {
                    apply_location(&mut record, line);
                }
                record
            })
    }

    fn match_dependency(&self, line: &str) -> Option<ErrorRecord> {
        if let Some(cap) = MISSING_MODULE_REGEX.captures(line) {
            let specifier = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
            // Relative imports that fail to resolve are bundler problems, not packages.
            if specifier.starts_with('.')
                || specifier.starts_with('/')
                || specifier.starts_with("@/")
            {
                let mut record = ErrorRecord::new(ErrorCategory::Bundler, line);
                record.suggestion = format!(
                    "Create the missing file for import '{}' or correct its path",
                    specifier
                );
                return Some(record);
            }
            let package = package_name(specifier);
            let mut record = ErrorRecord::new(
                ErrorCategory::Dependency,
                format!("Cannot resolve package '{}'", package),
            );
            record.suggestion = format!(
                "Add '{}' to package.json dependencies or use an installed package",
                package
            );
            return Some(record);
        }
        if let Some(cap) = NPM_ERROR_REGEX.captures(line) {
            let detail = cap.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            if detail.is_empty() {
                return None;
            }
            let mut record = ErrorRecord::new(ErrorCategory::Dependency, detail);
            if ERESOLVE_REGEX.is_match(line) {
                record.suggestion =
                    "Align conflicting peer dependency versions in package.json".to_string();
            }
            return Some(record);
        }
        if ERESOLVE_REGEX.is_match(line) {
            return Some(ErrorRecord::new(ErrorCategory::Dependency, line));
        }
        None
    }

    fn match_type_check(&self, line: &str) -> Option<ErrorRecord> {
        let cap = TS_ERROR_REGEX.captures(line)?;
        let code = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        let detail = cap.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        let mut record =
            ErrorRecord::new(ErrorCategory::TypeCheck, format!("{}: {}", code, detail));
        if detail.contains("is not assignable") {
            record.suggestion =
                "Align the value with the declared type or widen the type".to_string();
        } else if detail.contains("does not exist on type") {
            record.suggestion =
                "Add the missing property to the type or fix the property name".to_string();
        }
        Some(record)
    }

    fn match_bundler(&self, line: &str) -> Option<ErrorRecord> {
        if !BUNDLER_REGEX.is_match(line) {
            return None;
        }
        Some(ErrorRecord::new(ErrorCategory::Bundler, line))
    }

    fn match_runtime(&self, line: &str) -> Option<ErrorRecord> {
        if let Some(m) = RENDER_LOOP_REGEX.find(line) {
            let mut record = ErrorRecord::new(ErrorCategory::Runtime, m.as_str());
            record.auto_fixable = true;
            record.suggestion =
                "Move state updates out of render into an event handler \
                 or an effect with correct dependencies"
                    .to_string();
            return Some(record);
        }

        let cap = RUNTIME_REGEX.captures(line);
        if cap.is_none() && !UNCAUGHT_REGEX.is_match(line) {
            return None;
        }
        let message = cap
            .as_ref()
            .map(|c| {
                format!(
                    "{}: {}",
                    c.get(1).map(|m| m.as_str()).unwrap_or("Error"),
                    c.get(2).map(|m| m.as_str().trim()).unwrap_or_default()
                )
            })
            .unwrap_or_else(|| line.to_string());

        let mut record = ErrorRecord::new(ErrorCategory::Runtime, message);
        if let Some(c) = NOT_DEFINED_REGEX.captures(line) {
            record.auto_fixable = true;
            record.suggestion = format!(
                "Import or declare '{}' before it is used",
                c.get(1).map(|m| m.as_str()).unwrap_or_default()
            );
        } else if let Some(c) = READ_PROPS_REGEX.captures(line) {
            record.auto_fixable = true;
            record.suggestion = match c.get(2) {
                Some(prop) => format!(
                    "Guard against {} before reading '{}' (optional chaining or a default value)",
                    c.get(1).map(|m| m.as_str()).unwrap_or("undefined"),
                    prop.as_str()
                ),
                None => "Guard against missing values before reading properties".to_string(),
            };
        } else if let Some(c) = NOT_A_FUNCTION_REGEX.captures(line) {
            record.auto_fixable = true;
            record.suggestion = format!(
                "Check that '{}' is imported and has the expected type",
                c.get(1).map(|m| m.as_str()).unwrap_or_default()
            );
        }
        Some(record)
    }
}

/// Render records as a compact list for prompts and terminal summaries.
pub fn summarize(records: &[ErrorRecord]) -> String {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut out = format!("{}. [{}] {}", i + 1, r.category, r.message);
            if let Some(loc) = r.location() {
                out.push_str(&format!(" ({})", loc));
            }
            out.push_str(&format!(
                "\n   fix: {}{}",
                r.suggestion,
                if r.auto_fixable { "" } else { " (may need manual attention)" }
            ));
            out
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn context_window(lines: &[&str], idx: usize) -> String {
    let end = (idx + 1 + CONTEXT_LINES).min(lines.len());
    lines[idx..end].join("\n")
}

fn package_name(specifier: &str) -> String {
    let mut parts = specifier.split('/');
    match parts.next() {
        Some(scope) if scope.starts_with('@') => match parts.next() {
            Some(name) => format!("{}/{}", scope, name),
            None => scope.to_string(),
        },
        Some(name) => name.to_string(),
        None => specifier.to_string(),
    }
}

fn normalize_file(path: &str) -> String {
    match path.find("/src/") {
        Some(idx) if path.starts_with('/') => path[idx + 1..].to_string(),
        _ => path.trim_start_matches("./").to_string(),
    }
}

fn apply_location(record: &mut ErrorRecord, line: &str) {
    let stripped = URL_ORIGIN_REGEX.replace_all(line, "");
    if let Some(cap) = PAREN_LOCATION_REGEX.captures(&stripped) {
        record.file = cap.get(1).map(|m| normalize_file(m.as_str()));
        record.line = cap.get(2).and_then(|m| m.as_str().parse().ok());
        record.column = cap.get(3).and_then(|m| m.as_str().parse().ok());
        return;
    }
    if let Some(cap) = COLON_LOCATION_REGEX.captures(&stripped) {
        record.file = cap.get(1).map(|m| normalize_file(m.as_str()));
        record.line = cap.get(2).and_then(|m| m.as_str().parse().ok());
        record.column = cap.get(3).and_then(|m| m.as_str().parse().ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Vec<ErrorRecord> {
        ErrorClassifier::new(false).classify(text)
    }

    #[test]
    fn test_type_check_paren_location() {
        let records = classify(
            "src/App.tsx(12,5): error TS2322: Type 'string' is not assignable to type 'number'.",
        );
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.category, ErrorCategory::TypeCheck);
        assert!(r.message.starts_with("TS2322:"));
        assert_eq!(r.file.as_deref(), Some("src/App.tsx"));
        assert_eq!(r.line, Some(12));
        assert_eq!(r.column, Some(5));
        assert!(r.auto_fixable);
    }

    #[test]
    fn test_type_check_colon_location() {
        let records =
            classify("src/pages/Home.tsx:3:10 - error TS2304: Cannot find name 'useState'.");
        assert_eq!(records[0].category, ErrorCategory::TypeCheck);
        assert_eq!(records[0].location().as_deref(), Some("src/pages/Home.tsx:3:10"));
    }

    #[test]
    fn test_dependency_beats_type_check() {
        let records = classify(
            "src/main.tsx(1,20): error TS2307: Cannot find module 'react-router-dom' \
             or its corresponding type declarations.",
        );
        assert_eq!(records[0].category, ErrorCategory::Dependency);
        assert!(records[0].message.contains("react-router-dom"));
    }

    #[test]
    fn test_scoped_package_name() {
        let records = classify(concat!(
            r#"[vite] Failed to resolve import "@tanstack/react-query/devtools" "#,
            r#"from "src/main.tsx""#,
        ));
        assert_eq!(records[0].category, ErrorCategory::Dependency);
        assert!(records[0].message.contains("'@tanstack/react-query'"));
    }

    #[test]
    fn test_relative_import_is_bundler() {
        let records =
            classify(r#"Failed to resolve import "./components/Card" from "src/App.tsx""#);
        assert_eq!(records[0].category, ErrorCategory::Bundler);
        assert!(records[0].suggestion.contains("./components/Card"));
    }

    #[test]
    fn test_npm_install_failure() {
        let records =
            classify("npm ERR! code ERESOLVE\nnpm ERR! ERESOLVE unable to resolve dependency tree");
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.category == ErrorCategory::Dependency));
    }

    #[test]
    fn test_bundler_error() {
        let records = classify(
            concat!(
                "[plugin:vite:react-babel] /home/u/app/src/App.tsx: Unexpected token (14:2)\n",
                "  12 | return (\n  13 |   <div>\n  14 |   </span>",
            ),
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category, ErrorCategory::Bundler);
        assert_eq!(records[0].raw.lines().count(), 4);
    }

    #[test]
    fn test_runtime_not_defined_is_auto_fixable() {
        let records = classify(
            concat!(
                "Uncaught ReferenceError: Button is not defined\n",
                "    at App (http://localhost:5173/src/App.tsx:8:11)",
            ),
        );
        let r = records.iter().find(|r| r.category == ErrorCategory::Runtime).unwrap();
        assert!(r.auto_fixable);
        assert!(r.suggestion.contains("Button"));
        assert_eq!(r.location().as_deref(), Some("src/App.tsx:8:11"));
    }

    #[test]
    fn test_runtime_read_properties_of_undefined() {
        let records = classify("TypeError: Cannot read properties of undefined (reading 'map')");
        assert_eq!(records[0].category, ErrorCategory::Runtime);
        assert!(records[0].auto_fixable);
        assert!(records[0].suggestion.contains("'map'"));
    }

    #[test]
    fn test_runtime_render_loop() {
        let records = classify(
            "Error: Too many re-renders. \
             React limits the number of renders to prevent an infinite loop.",
        );
        assert_eq!(records[0].category, ErrorCategory::Runtime);
        assert!(records[0].auto_fixable);
    }

    #[test]
    fn test_unrecognized_runtime_not_auto_fixable() {
        let records = classify("Uncaught Error: Invariant failed");
        assert_eq!(records[0].category, ErrorCategory::Runtime);
        assert!(!records[0].auto_fixable);
    }

    #[test]
    fn test_at_location_strips_origin() {
        let records = classify(concat!(
            "TypeError: x.map is not a function\n",
            "    at List (http://localhost:5173/src/List.tsx:4:18)",
        ));
        assert_eq!(records.len(), 1);
        let mut record = ErrorRecord::new(ErrorCategory::Runtime, "x");
        apply_location(&mut record, "    at List (http://localhost:5173/src/List.tsx:4:18)");
        assert_eq!(record.file.as_deref(), Some("src/List.tsx"));
        assert_eq!(record.line, Some(4));
        assert_eq!(record.column, Some(18));
    }

    #[test]
    fn test_dedup_identical_lines() {
        let line = "src/App.tsx(1,1): error TS1005: ';' expected.";
        let records = classify(&format!("{}\n{}\n", line, line));
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_unknown_only_when_nothing_else() {
        let records = classify("something went wrong: error 42");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category, ErrorCategory::Unknown);

        let mixed = classify("something error-ish\nsrc/a.ts(1,1): error TS1005: ';' expected.");
        assert_eq!(mixed.len(), 1);
        assert_eq!(mixed[0].category, ErrorCategory::TypeCheck);
    }

    #[test]
    fn test_clean_output_yields_nothing() {
        let banner = "VITE v5.0.0  ready in 300 ms\n  Local: http://localhost:5173/";
        assert!(classify(banner).is_empty());
    }

    #[test]
    fn test_classify_or_unknown_uses_diagnosis() {
        let records = ErrorClassifier::default().classify_or_unknown("", "Blank white page");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category, ErrorCategory::Unknown);
        assert_eq!(records[0].message, "Blank white page");
    }

    #[test]
    fn test_summarize_lists_locations() {
        let records = classify(
            "src/App.tsx(12,5): error TS2322: Type 'string' is not assignable to type 'number'.",
        );
        let summary = summarize(&records);
        assert!(summary.contains("[type-check]"));
        assert!(summary.contains("src/App.tsx:12:5"));
    }

    #[test]
    fn test_category_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&ErrorCategory::TypeCheck).unwrap(), "\"type-check\"");
    }
}
