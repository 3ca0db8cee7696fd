//! Product specification input (`.kiln/spec.json` or `.kiln/spec.yaml`).

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::errors::OrchestratorError;

/// Spec file names searched in the state directory, in priority order.
pub const SPEC_FILE_NAMES: [&str; 3] = ["spec.json", "spec.yaml", "spec.yml"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub screens: Vec<Screen>,
    #[serde(default)]
    pub data_model: Vec<Entity>,
    #[serde(default)]
    pub design: DesignIntent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Screen ids this feature appears on
    #[serde(default)]
    pub screens: Vec<String>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// What a working result looks like; defaults to the description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default)]
    pub components: Vec<String>,
}

impl Screen {
    /// Route path, defaulting to `/<id>`.
    pub fn route(&self) -> String {
        self.route.clone().unwrap_or_else(|| format!("/{}", self.id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesignIntent {
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub palette: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

impl DesignIntent {
    pub fn is_empty(&self) -> bool {
        self.style.is_empty() && self.palette.is_empty() && self.notes.is_empty()
    }
}

impl AppSpec {
    /// Load a spec, choosing the format from the file extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            OrchestratorError::SpecReadFailed {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let spec: AppSpec = if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse spec YAML: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse spec JSON: {}", path.display()))?
        };
        Ok(spec)
    }

    /// Find the spec file inside a state directory.
    pub fn discover(state_dir: &Path) -> Result<PathBuf> {
        for name in SPEC_FILE_NAMES {
            let candidate = state_dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        bail!(
            "No spec found in {} (expected one of: {})",
            state_dir.display(),
            SPEC_FILE_NAMES.join(", ")
        )
    }

    pub fn feature(&self, id: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == id)
    }

    pub fn screen(&self, id: &str) -> Option<&Screen> {
        self.screens.iter().find(|s| s.id == id)
    }

    /// Stable content hash, used to detect spec edits after planning.
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Starter spec written by `kiln init`.
    pub fn template(name: &str) -> Self {
        AppSpec {
            name: name.to_string(),
            description: "A small task tracker".to_string(),
            features: vec![
                Feature {
                    id: "task-list".to_string(),
                    name: "Task list".to_string(),
                    description: "Show all tasks with their status and allow filtering".to_string(),
                    screens: vec!["home".to_string()],
                    components: vec!["TaskList".to_string(), "TaskFilter".to_string()],
                    depends_on: Vec::new(),
                    acceptance: None,
                },
                Feature {
                    id: "task-editor".to_string(),
                    name: "Task editor".to_string(),
                    description: "Create and edit a task".to_string(),
                    screens: vec!["edit".to_string()],
                    components: vec!["TaskForm".to_string()],
                    depends_on: vec!["task-list".to_string()],
                    acceptance: Some("The form validates the title and saves the task".to_string()),
                },
            ],
            screens: vec![
                Screen {
                    id: "home".to_string(),
                    name: "Home".to_string(),
                    description: "Landing screen".to_string(),
                    route: Some("/".to_string()),
                    components: vec!["PageHeader".to_string()],
                },
                Screen {
                    id: "edit".to_string(),
                    name: "Edit task".to_string(),
                    description: "Task editing screen".to_string(),
                    route: None,
                    components: vec!["PageHeader".to_string()],
                },
            ],
            data_model: vec![Entity {
                name: "Task".to_string(),
                fields: vec![
                    Field {
                        name: "id".to_string(),
                        ty: "string".to_string(),
                        optional: false,
                    },
                    Field {
                        name: "title".to_string(),
                        ty: "string".to_string(),
                        optional: false,
                    },
                    Field {
                        name: "done".to_string(),
                        ty: "boolean".to_string(),
                        optional: false,
                    },
                ],
            }],
            design: DesignIntent {
                style: "clean, minimal".to_string(),
                palette: vec!["slate".to_string(), "indigo".to_string()],
                notes: String::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_yaml_spec() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spec.yaml");
        std::fs::write(
            &path,
            r#"
name: demo
features:
  - id: auth
    name: Auth
    screens: [login]
    components: [LoginForm]
screens:
  - id: login
    name: Login
data_model:
  - name: User
    fields:
      - { name: email, type: string }
"#,
        )
        .unwrap();

        let spec = AppSpec::load(&path).unwrap();
        assert_eq!(spec.name, "demo");
        assert_eq!(spec.features[0].components, vec!["LoginForm"]);
        assert_eq!(spec.data_model[0].fields[0].ty, "string");
        assert_eq!(spec.screen("login").unwrap().route(), "/login");
        assert!(spec.design.is_empty());
    }

    #[test]
    fn test_load_missing_spec_is_read_error() {
        let dir = tempdir().unwrap();
        let err = AppSpec::load(&dir.path().join("spec.json")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrchestratorError>(),
            Some(OrchestratorError::SpecReadFailed { .. })
        ));
    }

    #[test]
    fn test_discover_prefers_json() {
        let dir = tempdir().unwrap();
        assert!(AppSpec::discover(dir.path()).is_err());
        std::fs::write(dir.path().join("spec.yaml"), "name: a").unwrap();
        std::fs::write(dir.path().join("spec.json"), r#"{"name":"a"}"#).unwrap();
        let found = AppSpec::discover(dir.path()).unwrap();
        assert!(found.ends_with("spec.json"));
    }

    #[test]
    fn test_content_hash_changes_with_content() {
        let a = AppSpec::template("a");
        let mut b = a.clone();
        assert_eq!(a.content_hash(), b.content_hash());
        b.description.push('!');
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }
}
