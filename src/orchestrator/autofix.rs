//! Corrective prompt for the `fixing` transition.
//!
//! Combines the classified errors with the previous attempt's diff so the
//! next generation sees exactly what it produced and why it was rejected.

use crate::classify::{ErrorRecord, summarize};
use crate::materialize::{FileChange, MaterializeReport, WrittenFile};

/// Cap on the rendered diff section.
pub const MAX_DIFF_BYTES: usize = 8_000;

/// Lines shown for a newly created file.
pub const CREATED_PREVIEW_LINES: usize = 30;

/// Lines shown per side of an updated file's changed window.
pub const MAX_WINDOW_LINES: usize = 40;

/// What the previous attempt left behind.
#[derive(Debug, Clone, Copy)]
pub enum PriorAttempt<'a> {
    Written(&'a MaterializeReport),
    /// The response was rejected before anything was written
    NothingWritten { reason: &'a str },
}

/// Changed region of `new` relative to `old`: (first changed line, removed lines, added lines).
pub fn changed_window<'a>(old: &'a str, new: &'a str) -> (usize, Vec<&'a str>, Vec<&'a str>) {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let prefix = old_lines
        .iter()
        .zip(&new_lines)
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = old_lines.len().min(new_lines.len()) - prefix;
    let suffix = old_lines
        .iter()
        .rev()
        .zip(new_lines.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    (
        prefix + 1,
        old_lines[prefix..old_lines.len() - suffix].to_vec(),
        new_lines[prefix..new_lines.len() - suffix].to_vec(),
    )
}

fn render_file(file: &WrittenFile) -> String {
    let mut out = String::new();
    match file.change {
        FileChange::Created => {
            let total = file.content.lines().count();
            out.push_str(&format!("--- created {} ({} lines)\n", file.path, total));
            for line in file.content.lines().take(CREATED_PREVIEW_LINES) {
                out.push_str(&format!("+ {}\n", line));
            }
            if total > CREATED_PREVIEW_LINES {
                out.push_str(&format!("  ... {} more lines\n", total - CREATED_PREVIEW_LINES));
            }
        }
        FileChange::Updated => {
            let previous = file.previous.as_deref().unwrap_or_default();
            let (line, removed, added) = changed_window(previous, &file.content);
            out.push_str(&format!("--- updated {} @@ line {}\n", file.path, line));
            for (prefix, lines) in [("-", &removed), ("+", &added)] {
                for l in lines.iter().take(MAX_WINDOW_LINES) {
                    out.push_str(&format!("{} {}\n", prefix, l));
                }
                if lines.len() > MAX_WINDOW_LINES {
                    out.push_str(&format!(
                        "{} ... {} more lines\n",
                        prefix,
                        lines.len() - MAX_WINDOW_LINES
                    ));
                }
            }
        }
        FileChange::Unchanged => {
            out.push_str(&format!("--- unchanged {}\n", file.path));
        }
    }
    out
}

/// Render the previous attempt's changes, capped at `MAX_DIFF_BYTES`.
pub fn render_diff(prior: PriorAttempt<'_>) -> String {
    let report = match prior {
        PriorAttempt::NothingWritten { reason } => {
            return format!("The previous attempt wrote no files: {}\n", reason);
        }
        PriorAttempt::Written(report) => report,
    };
    if report.files.is_empty() {
        return "The previous attempt wrote no files.\n".to_string();
    }

    let mut out = String::new();
    for (idx, file) in report.files.iter().enumerate() {
        let section = render_file(file);
        if out.len() + section.len() > MAX_DIFF_BYTES {
            out.push_str(&format!(
                "... diff truncated, {} more files\n",
                report.files.len() - idx
            ));
            break;
        }
        out.push_str(&section);
    }
    out
}

/// Build the corrective section appended to the next generation prompt.
pub fn corrective_prompt(
    attempt: u32,
    max_attempts: u32,
    errors: &[ErrorRecord],
    prior: PriorAttempt<'_>,
) -> String {
    let verdict = match prior {
        PriorAttempt::Written(_) => "The preview was verified as BROKEN after your last response.",
        PriorAttempt::NothingWritten { .. } => {
            "Your last response was rejected before anything was written or verified."
        }
    };
    let mut out = format!(
        "## PREVIOUS ATTEMPT FAILED (attempt {} of {})\n{}\n\n",
        attempt, max_attempts, verdict
    );

    out.push_str("### Errors\n");
    if errors.is_empty() {
        out.push_str("(no diagnostics were captured)\n");
    } else {
        out.push_str(&summarize(errors));
        out.push('\n');
        let raw: Vec<&str> = errors
            .iter()
            .map(|e| e.raw.trim())
            .filter(|r| !r.is_empty())
            .collect();
        if !raw.is_empty() {
            out.push_str("\nRaw output:\n```\n");
            out.push_str(&raw.join("\n---\n"));
            out.push_str("\n```\n");
        }
    }

    out.push_str("\n### Your previous changes\n```diff\n");
    out.push_str(&render_diff(prior));
    out.push_str("```\n\n");
    out.push_str(
        "Fix every error above. Emit each file you change in full, then the completion marker.",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorCategory;

    fn written(
        path: &str,
        change: FileChange,
        previous: Option<&str>,
        content: &str,
    ) -> WrittenFile {
        WrittenFile {
            path: path.into(),
            change,
            previous: previous.map(String::from),
            content: content.into(),
        }
    }

    #[test]
    fn test_changed_window_trims_prefix_and_suffix() {
        let old = "a\nb\nc\nd\n";
        let new = "a\nB\nC\nd\n";
        let (line, removed, added) = changed_window(old, new);
        assert_eq!(line, 2);
        assert_eq!(removed, vec!["b", "c"]);
        assert_eq!(added, vec!["B", "C"]);
    }

    #[test]
    fn test_changed_window_pure_insertion() {
        let (line, removed, added) = changed_window("a\nc\n", "a\nb\nc\n");
        assert_eq!(line, 2);
        assert!(removed.is_empty());
        assert_eq!(added, vec!["b"]);
    }

    #[test]
    fn test_changed_window_repeated_lines_do_not_overlap() {
        let (_, removed, added) = changed_window("x\nx\n", "x\nx\nx\n");
        assert!(removed.is_empty());
        assert_eq!(added, vec!["x"]);
    }

    #[test]
    fn test_render_diff_shapes() {
        let report = MaterializeReport {
            files: vec![
                written("src/New.tsx", FileChange::Created, None, "line1\nline2\n"),
                written("src/App.tsx", FileChange::Updated, Some("a\nold\nz\n"), "a\nnew\nz\n"),
                written("src/same.ts", FileChange::Unchanged, Some("s"), "s"),
            ],
        };
        let diff = render_diff(PriorAttempt::Written(&report));
        assert!(diff.contains("--- created src/New.tsx (2 lines)\n+ line1\n+ line2\n"));
        assert!(diff.contains("--- updated src/App.tsx @@ line 2\n- old\n+ new\n"));
        assert!(diff.contains("--- unchanged src/same.ts"));
    }

    #[test]
    fn test_render_diff_is_capped() {
        let big = "x".repeat(200);
        let content = vec![big.as_str(); 30].join("\n");
        let files = (0..20)
            .map(|i| written(&format!("src/F{}.tsx", i), FileChange::Created, None, &content))
            .collect();
        let diff = render_diff(PriorAttempt::Written(&MaterializeReport { files }));
        assert!(diff.len() <= MAX_DIFF_BYTES + 100);
        assert!(diff.contains("diff truncated"));
    }

    #[test]
    fn test_corrective_prompt_without_written_files() {
        let errors = vec![
            ErrorRecord::new(ErrorCategory::TypeCheck, "TS2304: Cannot find name 'Foo'")
                .with_raw("src/App.tsx(3,1): error TS2304: Cannot find name 'Foo'."),
        ];
        let prompt = corrective_prompt(
            1,
            3,
            &errors,
            PriorAttempt::NothingWritten {
                reason: "missing completion marker",
            },
        );
        assert!(prompt.contains("attempt 1 of 3"));
        assert!(prompt.contains("[type-check] TS2304"));
        assert!(prompt.contains("Raw output:"));
        assert!(prompt.contains("wrote no files: missing completion marker"));
        assert!(prompt.contains("rejected before anything was written"));
        assert!(!prompt.contains("verified as BROKEN"));
    }

    #[test]
    fn test_corrective_prompt_after_broken_preview() {
        let report = MaterializeReport {
            files: vec![written("src/App.tsx", FileChange::Created, None, "export {}\n")],
        };
        let errors = vec![ErrorRecord::new(ErrorCategory::Runtime, "page is blank")];
        let prompt = corrective_prompt(2, 3, &errors, PriorAttempt::Written(&report));
        assert!(prompt.starts_with("## PREVIOUS ATTEMPT FAILED (attempt 2 of 3)\n"));
        assert!(prompt.contains("verified as BROKEN after your last response"));
        assert!(!prompt.contains("rejected before anything was written"));
        assert!(prompt.contains("--- created src/App.tsx"));
    }
}
