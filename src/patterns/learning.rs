//! Convention extraction from a task's generated files.

use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use super::FactKind;
use crate::codegen::GeneratedFile;

/// Tailwind classes kept per task.
pub const TOP_TAILWIND_CLASSES: usize = 6;

static FUNCTION_COMPONENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:export\s+(?:default\s+)?)?function\s+[A-Z]\w*\s*\(").unwrap()
});

static ARROW_COMPONENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?m)^\s*(?:export\s+)?const\s+[A-Z]\w*\s*(?::\s*[\w.<>\[\], ]+)?=\s*",
        r"(?:\([^)]*\)|\w+)\s*(?::\s*[\w.<>\[\]]+\s*)?=>",
    ))
    .unwrap()
});

static DEFAULT_EXPORT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*export\s+default\b").unwrap());

static NAMED_EXPORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*export\s+(?:const|function)\s+[A-Z]\w*").unwrap()
});

static CLASS_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"className\s*=\s*(?:"([^"]*)"|'([^']*)'|\{`([^`]*)`\})"#).unwrap()
});

static HOOK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(use[A-Z]\w*)\s*\(").unwrap());

static ALIAS_IMPORT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"from\s+['"]@/"#).unwrap());

static PASCAL_CASE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][a-z0-9]+(?:[A-Z][a-z0-9]*)*$").unwrap());

/// A fact observed in one task's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedFact {
    pub kind: FactKind,
    /// Identity within the kind (e.g. the class name)
    pub value: String,
    /// Prompt-ready description
    pub text: String,
}

impl ObservedFact {
    fn new(kind: FactKind, value: &str, text: String) -> Self {
        Self {
            kind,
            value: value.to_string(),
            text,
        }
    }
}

fn is_component_file(path: &str) -> bool {
    let p = Path::new(path);
    let is_jsx = matches!(
        p.extension().and_then(|e| e.to_str()),
        Some("tsx") | Some("jsx")
    );
    let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    is_jsx && !matches!(stem, "main" | "index")
}

/// Extract convention facts from `files`.
pub fn extract_facts(files: &[GeneratedFile]) -> Vec<ObservedFact> {
    let mut facts = Vec::new();
    let components: Vec<&GeneratedFile> =
        files.iter().filter(|f| is_component_file(&f.path)).collect();

    if !components.is_empty() {
        let (mut arrow, mut function, mut default, mut named) = (0, 0, 0, 0);
        for file in &components {
            arrow += ARROW_COMPONENT_REGEX.find_iter(&file.content).count();
            function += FUNCTION_COMPONENT_REGEX.find_iter(&file.content).count();
            default += DEFAULT_EXPORT_REGEX.is_match(&file.content) as usize;
            named += NAMED_EXPORT_REGEX.is_match(&file.content) as usize;
        }

        if arrow > function {
            facts.push(ObservedFact::new(
                FactKind::ComponentShape,
                "arrow",
                "Components are arrow functions assigned to a const (`const Name = () => ...`)"
                    .into(),
            ));
        } else if function > arrow {
            facts.push(ObservedFact::new(
                FactKind::ComponentShape,
                "function",
                "Components are function declarations (`function Name() { ... }`)".into(),
            ));
        }

        if default > named {
            facts.push(ObservedFact::new(
                FactKind::ExportStyle,
                "default",
                "Component files use a default export".into(),
            ));
        } else if named > default {
            facts.push(ObservedFact::new(
                FactKind::ExportStyle,
                "named",
                "Components use named exports".into(),
            ));
        }

        let stems: Vec<&str> = components
            .iter()
            .filter_map(|f| Path::new(&f.path).file_stem().and_then(|s| s.to_str()))
            .collect();
        if stems.iter().all(|s| PASCAL_CASE_REGEX.is_match(s)) {
            let example = stems.first().copied().unwrap_or("Component");
            facts.push(ObservedFact::new(
                FactKind::FileNaming,
                "pascal-case",
                format!("Component files are named in PascalCase (e.g. {}.tsx)", example),
            ));
        }
    }

    for class in top_tailwind_classes(files, TOP_TAILWIND_CLASSES) {
        let text = format!("Tailwind utility `{}` is part of the visual vocabulary", class);
        facts.push(ObservedFact::new(FactKind::TailwindClass, &class, text));
    }

    let mut hooks = BTreeSet::new();
    for file in files {
        for cap in HOOK_REGEX.captures_iter(&file.content) {
            if let Some(name) = cap.get(1) {
                hooks.insert(name.as_str().to_string());
            }
        }
    }
    for hook in &hooks {
        facts.push(ObservedFact::new(
            FactKind::Hook,
            hook,
            format!("State and effects use the `{}` hook", hook),
        ));
    }

    if files.iter().any(|f| ALIAS_IMPORT_REGEX.is_match(&f.content)) {
        facts.push(ObservedFact::new(
            FactKind::ImportAlias,
            "@/",
            "Imports from src/ use the `@/` alias".into(),
        ));
    }

    facts
}

/// Most frequent classes across `className` attributes. Ties break alphabetically.
pub fn top_tailwind_classes(files: &[GeneratedFile], limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for file in files {
        for cap in CLASS_NAME_REGEX.captures_iter(&file.content) {
            let Some(value) = cap.get(1).or_else(|| cap.get(2)).or_else(|| cap.get(3)) else {
                continue;
            };
            for class in value.as_str().split_whitespace() {
                // Skip template interpolations.
                if class.contains("${") || class.contains('}') {
                    continue;
                }
                *counts.entry(class.to_string()).or_default() += 1;
            }
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(c, _)| c).collect()
}
