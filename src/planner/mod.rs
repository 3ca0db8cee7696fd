//! Module planner: decomposes an `AppSpec` into an ordered list of modules.
//!
//! Ordering for the fixed React + TypeScript + Vite + Tailwind stack:
//!
//! 1. `contracts`: shared types, only when the data model is non-empty
//! 2. `shell`: layout, routing and navigation for every screen
//! 3. `shared`: components referenced by two or more features/screens
//! 4. one module per feature, in stable topological order over `depends_on`
//! 5. `integration`: wires feature modules into the shell's routes
//! 6. `simplify`: optional cleanup pass
//!
//! Features whose component estimate reaches the decomposition threshold are
//! split into 2..=max ordered sub-tasks. Planning never retries; every error
//! is a fatal `PlanError`.

mod config;
mod estimate;

pub use config::{DEFAULT_DECOMPOSE_THRESHOLD, DEFAULT_MAX_SUB_TASKS, PlannerConfig};
pub use estimate::{chunk_count, estimate_components, shared_components, split_even};

use std::collections::HashSet;

use crate::errors::PlanError;
use crate::model::{Module, StepType, Task};
use crate::spec::{AppSpec, Feature};

pub const CONTRACTS_MODULE: &str = "contracts";
pub const SHELL_MODULE: &str = "shell";
pub const SHARED_MODULE: &str = "shared";
pub const INTEGRATION_MODULE: &str = "integration";
pub const SIMPLIFY_MODULE: &str = "simplify";

const RESERVED_IDS: [&str; 5] = [
    CONTRACTS_MODULE,
    SHELL_MODULE,
    SHARED_MODULE,
    INTEGRATION_MODULE,
    SIMPLIFY_MODULE,
];

pub struct ModulePlanner {
    config: PlannerConfig,
}

impl ModulePlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Plan the full module list for `spec`.
    pub fn plan(&self, spec: &AppSpec) -> Result<Vec<Module>, PlanError> {
        self.validate(spec)?;
        let ordered = topological_order(&spec.features)?;
        let shared = shared_components(spec);

        let mut modules = Vec::new();
        let has_contracts = !spec.data_model.is_empty();

        if has_contracts {
            modules.push(self.contracts_module(spec));
        }
        modules.push(self.shell_module(spec, has_contracts));
        if !shared.is_empty() {
            modules.push(self.shared_module(&shared, has_contracts));
        }

        let mut feature_ids = Vec::new();
        for feature in &ordered {
            modules.push(self.feature_module(feature, spec, &shared, has_contracts));
            feature_ids.push(feature.id.clone());
        }

        modules.push(self.integration_module(spec, &feature_ids));

        if self.config.simplify_step {
            let all: Vec<String> = modules.iter().map(|m| m.id.clone()).collect();
            modules.push(simplify_module(all));
        }

        tracing::debug!(
            modules = modules.len(),
            tasks = modules.iter().map(|m| m.tasks.len()).sum::<usize>(),
            "planned modules"
        );
        Ok(modules)
    }

    fn validate(&self, spec: &AppSpec) -> Result<(), PlanError> {
        if spec.features.is_empty() {
            return Err(PlanError::EmptySpec);
        }

        let mut screen_ids = HashSet::new();
        for screen in &spec.screens {
            if !screen_ids.insert(screen.id.as_str()) {
                return Err(PlanError::DuplicateId {
                    kind: "screen",
                    id: screen.id.clone(),
                });
            }
        }

        let mut feature_ids = HashSet::new();
        for feature in &spec.features {
            if RESERVED_IDS.contains(&feature.id.as_str()) {
                return Err(PlanError::DuplicateId {
                    kind: "module",
                    id: feature.id.clone(),
                });
            }
            if !feature_ids.insert(feature.id.as_str()) {
                return Err(PlanError::DuplicateId {
                    kind: "feature",
                    id: feature.id.clone(),
                });
            }
        }

        for feature in &spec.features {
            for dep in &feature.depends_on {
                if !feature_ids.contains(dep.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        feature: feature.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            for screen in &feature.screens {
                if !screen_ids.contains(screen.as_str()) {
                    return Err(PlanError::UnknownScreen {
                        feature: feature.id.clone(),
                        screen: screen.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn contracts_module(&self, spec: &AppSpec) -> Module {
        let entities: Vec<String> = spec
            .data_model
            .iter()
            .map(|e| {
                let fields: Vec<String> = e
                    .fields
                    .iter()
                    .map(|f| format!("{}{}: {}", f.name, if f.optional { "?" } else { "" }, f.ty))
                    .collect();
                format!("- {} {{ {} }}", e.name, fields.join(", "))
            })
            .collect();
        let names: Vec<&str> = spec.data_model.iter().map(|e| e.name.as_str()).collect();

        let task = Task::new(
            CONTRACTS_MODULE,
            &format!(
                "Create TypeScript types for the data model in src/types/.\nEntities:\n{}",
                entities.join("\n")
            ),
            StepType::Contracts,
        );
        let mut module =
            Module::new(CONTRACTS_MODULE, "Contracts", StepType::Contracts, vec![task]);
        module.description = "Shared types for the data model".to_string();
        module.acceptance = format!(
            "The app still builds and renders; types are exported for: {}",
            names.join(", ")
        );
        module
    }

    fn shell_module(&self, spec: &AppSpec, has_contracts: bool) -> Module {
        let routes: Vec<String> = spec
            .screens
            .iter()
            .map(|s| format!("- {} ({}): {}", s.name, s.route(), s.description))
            .collect();
        let mut description = format!(
            "Create the application shell: layout, navigation and client-side routing \
             for every screen.\nScreens:\n{}",
            routes.join("\n")
        );
        if !spec.design.is_empty() {
            description.push_str(&format!(
                "\nDesign intent: {} (palette: {}). {}",
                spec.design.style,
                spec.design.palette.join(", "),
                spec.design.notes
            ));
        }

        let task = Task::new(SHELL_MODULE, &description, StepType::Shell);
        let mut module = Module::new(SHELL_MODULE, "App shell", StepType::Shell, vec![task]);
        module.description = format!("{}: {}", spec.name, spec.description);
        module.acceptance = format!(
            "A layout with navigation renders, with a route for each screen: {}",
            spec.screens.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", ")
        );
        if has_contracts {
            module.depends_on.push(CONTRACTS_MODULE.to_string());
        }
        module
    }

    fn shared_module(&self, shared: &[String], has_contracts: bool) -> Module {
        let task = Task::new(
            SHARED_MODULE,
            &format!(
                "Create reusable UI components in src/components/shared/: {}",
                shared.join(", ")
            ),
            StepType::Shared,
        )
        .with_components(shared.to_vec());
        let mut module =
            Module::new(SHARED_MODULE, "Shared components", StepType::Shared, vec![task]);
        module.description = "Components used by more than one feature or screen".to_string();
        module.acceptance =
            format!("Shared components render without errors: {}", shared.join(", "));
        module.depends_on.push(SHELL_MODULE.to_string());
        if has_contracts {
            module.depends_on.push(CONTRACTS_MODULE.to_string());
        }
        module
    }

    fn feature_module(
        &self,
        feature: &Feature,
        spec: &AppSpec,
        shared: &[String],
        has_contracts: bool,
    ) -> Module {
        let screens: Vec<String> = feature
            .screens
            .iter()
            .filter_map(|id| spec.screen(id))
            .map(|s| format!("{} ({})", s.name, s.route()))
            .collect();
        let mut uses_shared: Vec<&str> = Vec::new();
        let screen_components = feature
            .screens
            .iter()
            .filter_map(|id| spec.screen(id))
            .flat_map(|s| &s.components);
        for name in feature.components.iter().chain(screen_components) {
            if shared.contains(name) && !uses_shared.contains(&name.as_str()) {
                uses_shared.push(name);
            }
        }

        let mut description = format!("Feature: {}\n{}", feature.name, feature.description);
        if !screens.is_empty() {
            description.push_str(&format!("\nScreens: {}", screens.join(", ")));
        }
        if !uses_shared.is_empty() {
            description.push_str(&format!(
                "\nReuse shared components (do not recreate): {}",
                uses_shared.join(", ")
            ));
        }

        let estimate = estimate_components(feature, spec);
        let owned: Vec<String> = feature
            .components
            .iter()
            .filter(|c| !shared.contains(c))
            .cloned()
            .collect();

        let tasks = if estimate >= self.config.decompose_threshold {
            self.split_feature(spec, feature, &owned, shared)
        } else {
            Vec::new()
        };
        let tasks = if tasks.is_empty() {
            vec![
                Task::new(
                    &feature.id,
                    &format!(
                        "Implement the {} feature in src/features/{}/",
                        feature.name, feature.id
                    ),
                    StepType::Module,
                )
                .with_components(owned.clone()),
            ]
        } else {
            tasks
        };

        tracing::debug!(
            feature = %feature.id,
            estimate,
            tasks = tasks.len(),
            "planned feature module"
        );

        let mut module = Module::new(&feature.id, &feature.name, StepType::Module, tasks);
        module.description = description;
        module.acceptance = feature
            .acceptance
            .clone()
            .unwrap_or_else(|| feature.description.clone());

        // Nearest context first: declared feature dependencies, then foundations.
        module.depends_on.extend(feature.depends_on.iter().cloned());
        if !shared.is_empty() {
            module.depends_on.push(SHARED_MODULE.to_string());
        }
        module.depends_on.push(SHELL_MODULE.to_string());
        if has_contracts {
            module.depends_on.push(CONTRACTS_MODULE.to_string());
        }
        module
    }

    /// Split an oversized feature into 2..=max ordered sub-tasks.
    ///
    /// Splits the same names the estimate counted: owned components first, then
    /// the non-shared components of referenced screens. Falls back to the screen
    /// list, then to every estimated name including shared ones.
    fn split_feature(
        &self,
        spec: &AppSpec,
        feature: &Feature,
        owned: &[String],
        shared: &[String],
    ) -> Vec<Task> {
        let max = self.config.sub_task_ceiling();

        let mut splittable: Vec<String> = owned.to_vec();
        let mut composed: Vec<String> = Vec::new();
        for name in &feature.components {
            if !composed.contains(name) {
                composed.push(name.clone());
            }
        }
        for screen in feature.screens.iter().filter_map(|id| spec.screen(id)) {
            for name in &screen.components {
                if !shared.contains(name) && !splittable.contains(name) {
                    splittable.push(name.clone());
                }
                if !composed.contains(name) {
                    composed.push(name.clone());
                }
            }
        }

        if splittable.len() >= 2 {
            return component_tasks(feature, &splittable, max);
        }
        if feature.screens.len() >= 2 {
            let chunks = split_even(&feature.screens, chunk_count(feature.screens.len(), max));
            return chunks
                .into_iter()
                .enumerate()
                .map(|(i, chunk)| {
                    let components = if i == 0 { splittable.clone() } else { Vec::new() };
                    Task::new(
                        &format!("{}.{}", feature.id, i + 1),
                        &format!(
                            "Implement part {} of the {} feature in src/features/{}/: screens {}",
                            i + 1,
                            feature.name,
                            feature.id,
                            chunk.join(", ")
                        ),
                        StepType::Module,
                    )
                    .with_components(components)
                    .with_sub_task(i)
                })
                .collect();
        }
        // Mostly shared components: split the composition work itself.
        component_tasks(feature, &composed, max)
    }

    fn integration_module(&self, spec: &AppSpec, feature_ids: &[String]) -> Module {
        let task = Task::new(
            INTEGRATION_MODULE,
            &format!(
                "Wire every feature into the shell's routes and navigation: {}",
                spec.features.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", ")
            ),
            StepType::Integration,
        );
        let mut module =
            Module::new(INTEGRATION_MODULE, "Integration", StepType::Integration, vec![task]);
        module.description = "Connect feature modules to the application shell".to_string();
        module.acceptance =
            "Every feature is reachable from the navigation and renders".to_string();
        module.depends_on = feature_ids.to_vec();
        module.depends_on.push(SHELL_MODULE.to_string());
        module
    }
}

/// One sub-task per contiguous chunk of `components`.
fn component_tasks(feature: &Feature, components: &[String], max: usize) -> Vec<Task> {
    split_even(components, chunk_count(components.len(), max))
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            Task::new(
                &format!("{}.{}", feature.id, i + 1),
                &format!(
                    "Implement part {} of the {} feature in src/features/{}/: components {}",
                    i + 1,
                    feature.name,
                    feature.id,
                    chunk.join(", ")
                ),
                StepType::Module,
            )
            .with_components(chunk)
            .with_sub_task(i)
        })
        .collect()
}

fn simplify_module(all: Vec<String>) -> Module {
    let task = Task::new(
        SIMPLIFY_MODULE,
        "Simplify the generated code: remove dead code and duplication without changing behavior",
        StepType::Simplify,
    );
    let mut module = Module::new(SIMPLIFY_MODULE, "Simplify", StepType::Simplify, vec![task]);
    module.description = "Cleanup pass over the generated application".to_string();
    module.acceptance = "The app looks and behaves exactly as before the cleanup".to_string();
    module.depends_on = all;
    module
}

/// Stable topological sort: among ready features the earliest-declared goes first.
fn topological_order(features: &[Feature]) -> Result<Vec<&Feature>, PlanError> {
    let mut emitted: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(features.len());

    while ordered.len() < features.len() {
        let next = features.iter().find(|f| {
            !emitted.contains(f.id.as_str())
                && f.depends_on.iter().all(|d| emitted.contains(d.as_str()))
        });
        match next {
            Some(feature) => {
                emitted.insert(feature.id.as_str());
                ordered.push(feature);
            }
            None => {
                let remaining: Vec<&Feature> = features
                    .iter()
                    .filter(|f| !emitted.contains(f.id.as_str()))
                    .collect();
                return Err(PlanError::DependencyCycle {
                    cycle: find_cycle(&remaining),
                });
            }
        }
    }
    Ok(ordered)
}

/// Walk unmet dependencies from the first remaining feature until an id repeats.
fn find_cycle(remaining: &[&Feature]) -> Vec<String> {
    let lookup = |id: &str| remaining.iter().find(|f| f.id == id).copied();
    let Some(start) = remaining.first() else {
        return Vec::new();
    };

    let mut path: Vec<String> = vec![start.id.clone()];
    let mut current = *start;
    loop {
        let Some(next) = current.depends_on.iter().find_map(|d| lookup(d)) else {
            return path;
        };
        if let Some(pos) = path.iter().position(|id| *id == next.id) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(next.id.clone());
            return cycle;
        }
        path.push(next.id.clone());
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Entity, Field, Screen};

    fn feature(id: &str, deps: &[&str], components: &[&str]) -> Feature {
        Feature {
            id: id.to_string(),
            name: id.to_string(),
            description: format!("{} feature", id),
            screens: Vec::new(),
            components: components.iter().map(|s| s.to_string()).collect(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            acceptance: None,
        }
    }

    fn base_spec(features: Vec<Feature>) -> AppSpec {
        AppSpec {
            name: "demo".into(),
            description: String::new(),
            features,
            screens: Vec::new(),
            data_model: Vec::new(),
            design: Default::default(),
        }
    }

    fn planner() -> ModulePlanner {
        ModulePlanner::new(PlannerConfig::default())
    }

    fn ids(modules: &[Module]) -> Vec<&str> {
        modules.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_plan_order_without_data_model() {
        let spec = base_spec(vec![feature("a", &[], &["A"])]);
        let modules = planner().plan(&spec).unwrap();
        assert_eq!(ids(&modules), vec!["shell", "a", "integration"]);
    }

    #[test]
    fn test_plan_full_order() {
        let mut spec = base_spec(vec![
            feature("b", &["a"], &["Button", "B"]),
            feature("a", &[], &["Button"]),
        ]);
        spec.data_model.push(Entity {
            name: "User".into(),
            fields: vec![Field {
                name: "id".into(),
                ty: "string".into(),
                optional: false,
            }],
        });
        let config = PlannerConfig::default().set_simplify_step(true);
        let modules = ModulePlanner::new(config).plan(&spec).unwrap();
        assert_eq!(
            ids(&modules),
            vec!["contracts", "shell", "shared", "a", "b", "integration", "simplify"]
        );

        let b = modules.iter().find(|m| m.id == "b").unwrap();
        assert_eq!(b.depends_on, vec!["a", "shared", "shell", "contracts"]);
        // Shared components are not owned by the feature task
        assert_eq!(b.tasks[0].components, vec!["B"]);

        let simplify = modules.last().unwrap();
        assert_eq!(simplify.depends_on.len(), 6);
    }

    #[test]
    fn test_topological_sort_is_stable() {
        let spec = base_spec(vec![
            feature("c", &[], &[]),
            feature("b", &["c"], &[]),
            feature("a", &[], &[]),
        ]);
        let modules = planner().plan(&spec).unwrap();
        assert_eq!(ids(&modules), vec!["shell", "c", "b", "a", "integration"]);
    }

    #[test]
    fn test_empty_spec_is_error() {
        assert_eq!(planner().plan(&base_spec(vec![])), Err(PlanError::EmptySpec));
    }

    #[test]
    fn test_unknown_dependency_is_error() {
        let spec = base_spec(vec![feature("a", &["ghost"], &[])]);
        assert_eq!(
            planner().plan(&spec),
            Err(PlanError::UnknownDependency {
                feature: "a".into(),
                dependency: "ghost".into()
            })
        );
    }

    #[test]
    fn test_duplicate_and_reserved_ids() {
        let spec = base_spec(vec![feature("a", &[], &[]), feature("a", &[], &[])]);
        assert!(matches!(
            planner().plan(&spec),
            Err(PlanError::DuplicateId { kind: "feature", .. })
        ));

        let spec = base_spec(vec![feature("shell", &[], &[])]);
        assert!(matches!(
            planner().plan(&spec),
            Err(PlanError::DuplicateId { kind: "module", .. })
        ));
    }

    #[test]
    fn test_cycle_is_error_with_path() {
        let spec = base_spec(vec![
            feature("a", &["b"], &[]),
            feature("b", &["a"], &[]),
            feature("c", &[], &[]),
        ]);
        assert_eq!(
            planner().plan(&spec),
            Err(PlanError::DependencyCycle {
                cycle: vec!["a".into(), "b".into(), "a".into()]
            })
        );
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let spec = base_spec(vec![feature("a", &["a"], &[])]);
        assert_eq!(
            planner().plan(&spec),
            Err(PlanError::DependencyCycle {
                cycle: vec!["a".into(), "a".into()]
            })
        );
    }

    #[test]
    fn test_unknown_screen_is_error() {
        let mut f = feature("a", &[], &[]);
        f.screens.push("nowhere".into());
        assert!(matches!(
            planner().plan(&base_spec(vec![f])),
            Err(PlanError::UnknownScreen { .. })
        ));
    }

    #[test]
    fn test_below_threshold_is_single_task() {
        let spec = base_spec(vec![feature("a", &[], &["A", "B", "C"])]);
        let modules = planner().plan(&spec).unwrap();
        let a = &modules[1];
        assert_eq!(a.tasks.len(), 1);
        assert!(a.tasks[0].sub_task.is_none());
        assert!(!a.is_decomposed());
    }

    #[test]
    fn test_at_threshold_splits_into_sub_tasks() {
        let spec = base_spec(vec![feature("a", &[], &["A", "B", "C", "D"])]);
        let modules = planner().plan(&spec).unwrap();
        let a = &modules[1];
        assert_eq!(a.tasks.len(), 2);
        assert_eq!(a.tasks[0].id, "a.1");
        assert_eq!(a.tasks[0].sub_task, Some(0));
        assert_eq!(a.tasks[1].sub_task, Some(1));
        assert_eq!(a.tasks[0].components, vec!["A", "B"]);
        assert_eq!(a.tasks[1].components, vec!["C", "D"]);
    }

    #[test]
    fn test_large_feature_capped_at_max_sub_tasks() {
        let comps: Vec<String> = (0..20).map(|i| format!("C{}", i)).collect();
        let refs: Vec<&str> = comps.iter().map(String::as_str).collect();
        let spec = base_spec(vec![feature("a", &[], &refs)]);
        let modules = planner().plan(&spec).unwrap();
        assert_eq!(modules[1].tasks.len(), 4);
        let total: usize = modules[1].tasks.iter().map(|t| t.components.len()).sum();
        assert_eq!(total, 20);
    }

    fn screen(id: &str, components: &[&str]) -> Screen {
        Screen {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            route: None,
            components: components.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_split_counts_screen_components() {
        let mut spec = base_spec(vec![]);
        spec.screens.push(screen("dash", &["Panel", "Chart", "Table", "Filter", "Legend"]));
        let mut f = feature("reports", &[], &["Root"]);
        f.screens = vec!["dash".into()];
        spec.features.push(f);

        let modules = planner().plan(&spec).unwrap();
        let reports = modules.iter().find(|m| m.id == "reports").unwrap();
        assert_eq!(estimate_components(&spec.features[0], &spec), 6);
        assert_eq!(reports.tasks.len(), 2);
        assert_eq!(reports.tasks[0].components, vec!["Root", "Panel", "Chart"]);
        assert_eq!(reports.tasks[1].components, vec!["Table", "Filter", "Legend"]);
        assert_eq!(reports.tasks[1].sub_task, Some(1));
    }

    #[test]
    fn test_split_falls_back_to_screens() {
        let mut spec = base_spec(vec![]);
        for id in ["s1", "s2", "s3", "s4"] {
            spec.screens.push(screen(id, &[]));
        }
        let mut f = feature("dash", &[], &["DashRoot"]);
        f.screens = vec!["s1".into(), "s2".into(), "s3".into(), "s4".into()];
        spec.features.push(f);

        let modules = planner().plan(&spec).unwrap();
        let dash = modules.iter().find(|m| m.id == "dash").unwrap();
        assert_eq!(dash.tasks.len(), 2);
        assert!(dash.tasks[0].description.contains("screens s1, s2"));
        assert_eq!(dash.tasks[0].components, vec!["DashRoot"]);
        assert!(dash.tasks[1].description.contains("screens s3, s4"));
    }

    #[test]
    fn test_split_of_shared_only_feature() {
        // Every component of "board" is also used by "inbox", so none is owned.
        let spec = base_spec(vec![
            feature("board", &[], &["Card", "Avatar", "Badge", "Menu"]),
            feature("inbox", &[], &["Card", "Avatar", "Badge", "Menu"]),
        ]);
        let modules = planner().plan(&spec).unwrap();
        let board = modules.iter().find(|m| m.id == "board").unwrap();
        assert_eq!(board.tasks.len(), 2);
        assert_eq!(board.tasks[0].components, vec!["Card", "Avatar"]);
        assert_eq!(board.tasks[1].components, vec!["Badge", "Menu"]);
    }

    #[test]
    fn test_template_spec_plans() {
        let modules = planner().plan(&AppSpec::template("demo")).unwrap();
        assert_eq!(
            ids(&modules),
            vec!["contracts", "shell", "shared", "task-list", "task-editor", "integration"]
        );
    }
}
