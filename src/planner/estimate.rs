//! Component estimation and sub-task splitting.

use std::collections::HashMap;

use super::config::{COMPONENTS_PER_SUB_TASK, MIN_SUB_TASKS};
use crate::spec::{AppSpec, Feature};

/// Components referenced by two or more features or screens, in first-seen order.
pub fn shared_components(spec: &AppSpec) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();

    let owners = spec
        .features
        .iter()
        .map(|f| &f.components)
        .chain(spec.screens.iter().map(|s| &s.components));

    for components in owners {
        let mut local: Vec<&str> = components.iter().map(String::as_str).collect();
        local.sort_unstable();
        local.dedup();
        for name in local {
            *counts.entry(name).or_insert(0) += 1;
        }
    }

    // Re-walk in declaration order so the output is stable.
    let mut shared = Vec::new();
    for components in spec
        .features
        .iter()
        .map(|f| &f.components)
        .chain(spec.screens.iter().map(|s| &s.components))
    {
        for name in components {
            if counts.get(name.as_str()).copied().unwrap_or(0) >= 2 && !shared.contains(name) {
                shared.push(name.clone());
            }
        }
    }
    shared
}

/// Distinct component names a feature composes, plus one per referenced
/// screen that declares no components.
pub fn estimate_components(feature: &Feature, spec: &AppSpec) -> usize {
    let mut names: Vec<&str> = feature.components.iter().map(String::as_str).collect();
    let mut bare_screens = 0;

    for screen_id in &feature.screens {
        match spec.screen(screen_id) {
            Some(screen) if !screen.components.is_empty() => {
                names.extend(screen.components.iter().map(String::as_str));
            }
            _ => bare_screens += 1,
        }
    }

    names.sort_unstable();
    names.dedup();
    names.len() + bare_screens
}

/// Number of chunks for `n` items: `clamp(ceil(n / 3), 2, max)`, never more than `n`.
pub fn chunk_count(n: usize, max_sub_tasks: usize) -> usize {
    let wanted = n.div_ceil(COMPONENTS_PER_SUB_TASK);
    wanted.clamp(MIN_SUB_TASKS, max_sub_tasks.max(MIN_SUB_TASKS)).min(n)
}

/// Split items into `chunks` contiguous, near-even groups (earlier groups take the remainder).
pub fn split_even<T: Clone>(items: &[T], chunks: usize) -> Vec<Vec<T>> {
    if chunks == 0 || items.is_empty() {
        return Vec::new();
    }
    let base = items.len() / chunks;
    let remainder = items.len() % chunks;
    let mut out = Vec::with_capacity(chunks);
    let mut start = 0;
    for i in 0..chunks {
        let len = base + usize::from(i < remainder);
        out.push(items[start..start + len].to_vec());
        start += len;
    }
    out
}
