//! Configuration view and validation: `kiln config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use kiln::kiln_config::{CONFIG_FILE_NAME, KilnConfig, KilnToml};

    let state_dir = project_dir.join(".kiln");
    let config_path = state_dir.join(CONFIG_FILE_NAME);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("kiln Configuration");
            println!("==================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No kiln.toml found at {}, showing defaults.", config_path.display());
            }
            println!();

            // Effective values: file, then KILN_* environment overrides.
            let toml = if config_path.exists() {
                KilnConfig::new(project_dir.to_path_buf())?.toml
            } else {
                let mut toml = KilnToml::default();
                toml.apply_env();
                toml
            };
            print!("{}", toml::to_string_pretty(&toml)?);
            println!();
            if !config_path.exists() {
                println!("Run 'kiln config init' to create a kiln.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No kiln.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = KilnConfig::new(project_dir.to_path_buf())?.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("kiln.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            std::fs::create_dir_all(&state_dir)?;
            KilnToml::default().save(&config_path)?;

            println!("Created kiln.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [build] max_attempts, decompose_threshold, max_sub_tasks");
            println!("  - [generation] backend, model, api_key_env");
            println!("  - [preview] command, port, start_timeout_secs");
            println!("  - [verify] screenshot_cmd, settle_ms");
            println!();
        }
    }

    Ok(())
}
