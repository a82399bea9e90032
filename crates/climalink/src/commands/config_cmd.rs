//! Config subcommand handlers. None of these touch the radio.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

fn save(cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    Ok(config::save_config_to(cfg, &config::config_file(global))?)
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            println!("{}", config::config_file(global).display());
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = config::load(global)?;
            let out = output::render_single(
                &global.output,
                &cfg,
                |c| format!("{c:#?}"),
                |_| "config".into(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load(global)?;
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: climalink config add-device <ADDRESS>");
            } else {
                for (name, profile) in &cfg.profiles {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}  ({} devices)", profile.devices.len());
                }
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load(global)?;
            if !cfg.profiles.contains_key(&name) {
                return Err(config::profile_not_found(&name, &cfg));
            }
            cfg.default_profile = Some(name.clone());
            save(&cfg, global)?;
            if !global.quiet {
                eprintln!("✓ Default profile set to '{name}'");
            }
            Ok(())
        }

        // ── Devices ─────────────────────────────────────────────────
        ConfigCommand::AddDevice { address } => {
            let mut cfg = config::load(global)?;
            let profile_name = config::active_profile_name(global, &cfg);
            let added = cfg
                .profiles
                .entry(profile_name.clone())
                .or_default()
                .add_device(&address)?;

            if added {
                save(&cfg, global)?;
                if !global.quiet {
                    eprintln!("✓ Added {address} to profile '{profile_name}'");
                }
            } else if !global.quiet {
                eprintln!("{address} is already in profile '{profile_name}'");
            }
            Ok(())
        }

        ConfigCommand::RemoveDevice { address } => {
            let mut cfg = config::load(global)?;
            let profile_name = config::active_profile_name(global, &cfg);
            let removed = cfg
                .profiles
                .get_mut(&profile_name)
                .is_some_and(|p| p.remove_device(&address));

            if !removed {
                return Err(CliError::Validation {
                    field: "address".into(),
                    reason: format!("{address} is not in profile '{profile_name}'"),
                });
            }
            save(&cfg, global)?;
            if !global.quiet {
                eprintln!("✓ Removed {address} from profile '{profile_name}'");
            }
            Ok(())
        }
    }
}
