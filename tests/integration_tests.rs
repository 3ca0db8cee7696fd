//! Integration tests for the kiln CLI
//!
//! These drive the binary end to end without a generation service: every
//! command here works offline.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const TS_ERROR: &str = "src/App.tsx(4,10): error TS2304: Cannot find name 'Foo'.\n";

/// A kiln command isolated from the real home directory.
fn kiln(home: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("kiln");
    cmd.env("KILN_HOME", home.path())
        .env_remove("KILN_MAX_ATTEMPTS")
        .env_remove("RUST_LOG");
    cmd
}

struct Workspace {
    home: TempDir,
    project: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            home: TempDir::new().unwrap(),
            project: TempDir::new().unwrap(),
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = kiln(&self.home);
        cmd.current_dir(self.project.path());
        cmd
    }

    fn init(&self) {
        self.cmd().arg("init").assert().success();
    }

    fn plan(&self) {
        self.cmd().arg("plan").assert().success();
    }

    fn state(&self, name: &str) -> std::path::PathBuf {
        self.project.path().join(".kiln").join(name)
    }
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_kiln_help() {
        let ws = Workspace::new();
        ws.cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("build"))
            .stdout(predicate::str::contains("classify"));
    }

    #[test]
    fn test_kiln_version() {
        let ws = Workspace::new();
        ws.cmd().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let ws = Workspace::new();
        ws.cmd()
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized kiln project"));

        assert!(ws.state("kiln.toml").exists());
        assert!(ws.state("spec.json").exists());
        assert!(ws.state("logs").is_dir());
    }

    #[test]
    fn test_init_is_idempotent() {
        let ws = Workspace::new();
        ws.init();
        fs::write(ws.state("spec.json"), "{\"name\": \"mine\", \"features\": []}").unwrap();

        ws.cmd()
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
        // An existing spec is never overwritten.
        let spec = fs::read_to_string(ws.state("spec.json")).unwrap();
        assert!(spec.contains("mine"));
    }

    #[test]
    fn test_commands_require_init() {
        let ws = Workspace::new();
        for args in [vec!["plan"], vec!["build"], vec!["retry", "home"]] {
            ws.cmd()
                .args(&args)
                .assert()
                .failure()
                .stderr(predicate::str::contains("kiln init"));
        }
    }

    #[test]
    fn test_project_dir_flag() {
        let ws = Workspace::new();
        kiln(&ws.home)
            .arg("--project-dir")
            .arg(ws.project.path())
            .arg("init")
            .assert()
            .success();
        assert!(ws.state("kiln.toml").exists());
    }
}

// =============================================================================
// Planning and Status
// =============================================================================

mod planning {
    use super::*;

    #[test]
    fn test_plan_writes_project() {
        let ws = Workspace::new();
        ws.init();
        ws.cmd()
            .arg("plan")
            .assert()
            .success()
            .stdout(predicate::str::contains("contracts"))
            .stdout(predicate::str::contains("task-list"))
            .stdout(predicate::str::contains("integration"));

        let project: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(ws.state("project.json")).unwrap()).unwrap();
        assert_eq!(project["version"], 0);
        assert_eq!(project["mode"], "dev");
        let ids: Vec<&str> = project["modules"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids.first(), Some(&"contracts"));
        assert!(ids.contains(&"task-editor"));
    }

    #[test]
    fn test_replan_unchanged_spec_is_noop() {
        let ws = Workspace::new();
        ws.init();
        ws.plan();
        ws.cmd()
            .arg("plan")
            .assert()
            .success()
            .stdout(predicate::str::contains("up to date"));
    }

    #[test]
    fn test_replan_changed_spec_needs_force() {
        let ws = Workspace::new();
        ws.init();
        ws.plan();

        let path = ws.state("spec.json");
        let mut spec: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        spec["description"] = "A different app".into();
        fs::write(&path, serde_json::to_string_pretty(&spec).unwrap()).unwrap();

        ws.cmd()
            .arg("plan")
            .assert()
            .failure()
            .stderr(predicate::str::contains("--force"));
        ws.cmd().args(["plan", "--force"]).assert().success();
    }

    #[test]
    fn test_status_before_and_after_plan() {
        let ws = Workspace::new();
        ws.cmd()
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Not initialized"));

        ws.init();
        ws.cmd()
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("run 'kiln plan'"));

        ws.plan();
        ws.cmd()
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("task-list"))
            .stdout(predicate::str::contains("draft"));
    }

    #[test]
    fn test_build_unknown_module_is_rejected() {
        let ws = Workspace::new();
        ws.init();
        ws.plan();
        ws.cmd()
            .args(["build", "--module", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown module 'nope'"));
    }

    #[test]
    fn test_retry_without_failed_task() {
        let ws = Workspace::new();
        ws.init();
        ws.plan();
        ws.cmd()
            .args(["retry", "shell"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("no failed task"));
        ws.cmd()
            .args(["skip", "missing"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown module 'missing'"));
    }

    #[test]
    fn test_promote_refused_while_modules_unfinished() {
        let ws = Workspace::new();
        ws.init();
        ws.plan();
        ws.cmd()
            .args(["promote", "prod"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cannot promote from dev to prod"));
        ws.cmd()
            .args(["promote", "test"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Promotion blocked"));
    }

    #[test]
    fn test_reset_force_removes_plan() {
        let ws = Workspace::new();
        ws.init();
        ws.plan();
        assert!(ws.state("project.json").exists());

        ws.cmd()
            .args(["reset", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Reset complete"));
        assert!(!ws.state("project.json").exists());
        assert!(ws.state("spec.json").exists());
        assert!(ws.state("kiln.toml").exists());
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let ws = Workspace::new();
        ws.cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("showing defaults"))
            .stdout(predicate::str::contains("max_attempts = 3"));
    }

    #[test]
    fn test_config_validate_default_file() {
        let ws = Workspace::new();
        ws.init();
        ws.cmd()
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let ws = Workspace::new();
        ws.init();
        fs::write(ws.state("kiln.toml"), "[build]\nmax_attempts = 0\n").unwrap();
        ws.cmd()
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("build.max_attempts = 0"));
    }

    #[test]
    fn test_config_init_does_not_overwrite() {
        let ws = Workspace::new();
        ws.init();
        ws.cmd()
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_env_overrides_show_in_config() {
        let ws = Workspace::new();
        ws.init();
        ws.cmd()
            .env("KILN_MAX_ATTEMPTS", "5")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_attempts = 5"));
    }
}

// =============================================================================
// Inspection
// =============================================================================

mod inspection {
    use super::*;

    #[test]
    fn test_classify_stdin() {
        let ws = Workspace::new();
        ws.cmd()
            .arg("classify")
            .write_stdin(TS_ERROR)
            .assert()
            .success()
            .stdout(predicate::str::contains("[type-check]"))
            .stdout(predicate::str::contains("src/App.tsx:4"));
    }

    #[test]
    fn test_classify_file_as_json() {
        let ws = Workspace::new();
        let log = ws.project.path().join("console.log");
        fs::write(&log, format!("{}npm ERR! code ERESOLVE\n", TS_ERROR)).unwrap();

        let output = ws.cmd().arg("classify").arg(&log).arg("--json").output().unwrap();
        assert!(output.status.success());
        let records: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let categories: Vec<&str> = records
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["category"].as_str().unwrap())
            .collect();
        assert!(categories.contains(&"type-check"));
        assert!(categories.contains(&"dependency"));
    }

    #[test]
    fn test_classify_nothing_recognized() {
        let ws = Workspace::new();
        ws.cmd()
            .arg("classify")
            .write_stdin("all good\n")
            .assert()
            .success()
            .stdout(predicate::str::contains("No errors recognized"));
    }

    #[test]
    fn test_timers_show_seeds_on_fresh_home() {
        let ws = Workspace::new();
        ws.cmd()
            .arg("timers")
            .assert()
            .success()
            .stdout(predicate::str::contains("simplify"))
            .stdout(predicate::str::contains("seed"));
    }

    #[test]
    fn test_patterns_empty_project() {
        let ws = Workspace::new();
        ws.init();
        ws.cmd()
            .arg("patterns")
            .assert()
            .success()
            .stdout(predicate::str::contains("No patterns learned yet"));
    }
}
