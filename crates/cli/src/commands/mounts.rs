//! Mount management commands
//!
//! Mounts live in the config file and are established every time the CLI
//! starts. `add` validates a mount against the configured ones before it is
//! saved, so a conflicting configuration never reaches the file.

use std::collections::BTreeMap;

use clap::Subcommand;
use objio_core::{
    Config, ConfigManager, Error, MountConfig, MountOptions, Storage, StorageBuilder,
    StorageParameters,
};
use serde::Serialize;

use super::{factories, open_storage};
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Parameter names whose values are never printed
const SECRET_PARAMETERS: &[&str] = &["secret_key", "session_token", "password"];

/// Mount subcommands
#[derive(Subcommand, Debug)]
pub enum MountsCommands {
    /// List active mounts
    List,

    /// Add a mount to the config file
    Add(AddArgs),

    /// Remove every configured mount that claims a prefix
    Remove(RemoveArgs),
}

/// Arguments for the `mounts add` command
#[derive(clap::Args, Debug)]
pub struct AddArgs {
    /// Storage name (e.g., "s3", "memory")
    pub storage: String,

    /// Storage parameters as KEY=VALUE (e.g., endpoint=http://localhost:9000)
    #[arg(value_parser = parse_parameter)]
    pub parameters: Vec<(String, String)>,

    /// Replace configured mounts that claim the same prefixes
    #[arg(long)]
    pub replace: bool,
}

/// Arguments for the `mounts remove` command
#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    /// Prefix to unmount (e.g., "s3://")
    pub prefix: String,
}

/// Mount information for output (secrets redacted)
#[derive(Debug, Serialize)]
struct MountInfo {
    prefix: String,
    storage: String,
    parameters: BTreeMap<String, String>,
}

impl MountInfo {
    fn new(prefix: &str, storage: &str, parameters: &StorageParameters) -> Self {
        Self {
            prefix: prefix.to_string(),
            storage: storage.to_string(),
            parameters: redact(parameters),
        }
    }
}

#[derive(Debug, Serialize)]
struct MountOperationOutput {
    success: bool,
    storage: String,
    prefixes: Vec<String>,
    message: String,
}

/// Execute a mounts subcommand
pub fn execute(cmd: MountsCommands, manager: &ConfigManager, formatter: &Formatter) -> ExitCode {
    match cmd {
        MountsCommands::List => match open_storage(manager) {
            Ok(storage) => execute_list(&storage, formatter),
            Err(e) => {
                formatter.error(&format!("{e:#}"));
                ExitCode::for_anyhow(&e)
            }
        },
        MountsCommands::Add(args) => execute_add(args, manager, formatter),
        MountsCommands::Remove(args) => execute_remove(args, manager, formatter),
    }
}

fn execute_list(storage: &Storage, formatter: &Formatter) -> ExitCode {
    let mounts: Vec<MountInfo> = storage
        .mounts()
        .iter()
        .map(|entry| MountInfo::new(entry.prefix(), entry.storage_name(), entry.parameters()))
        .collect();

    if formatter.is_json() {
        formatter.json(&mounts);
    } else if mounts.is_empty() {
        formatter.println("No mounts configured.");
    } else {
        for mount in &mounts {
            let parameters: Vec<String> = mount
                .parameters
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            formatter.println(&format!(
                "{:<32} {:<8} {}",
                mount.prefix,
                mount.storage,
                parameters.join(" ")
            ));
        }
    }
    ExitCode::Success
}

fn execute_add(args: AddArgs, manager: &ConfigManager, formatter: &Formatter) -> ExitCode {
    let mount = MountConfig {
        storage: args.storage,
        parameters: args.parameters.into_iter().collect(),
    };

    let result = manager
        .load()
        .and_then(|config| add_mount(config, &mount, args.replace));
    let (config, prefixes) = match result {
        Ok(added) => added,
        Err(e) => return formatter.fail(&format!("Failed to add '{}' mount", mount.storage), &e),
    };

    let message = match config {
        None => {
            formatter.warning(&format!("'{}' is already mounted with these parameters", mount.storage));
            "already configured".to_string()
        }
        Some(config) => {
            if let Err(e) = manager.save(&config) {
                return formatter.fail("Failed to save config", &e);
            }
            format!("mounted at {}", prefixes.join(", "))
        }
    };

    if formatter.is_json() {
        formatter.json(&MountOperationOutput {
            success: true,
            storage: mount.storage,
            prefixes,
            message,
        });
    } else {
        formatter.success(&format!("'{}' {message}", mount.storage));
    }
    ExitCode::Success
}

/// Config with `mount` added, or `None` when it is already present
///
/// The mount is established against the existing ones first, so conflicts
/// surface as [`Error::ConfigurationConflict`] unless `replace` is set.
fn add_mount(
    mut config: Config,
    mount: &MountConfig,
    replace: bool,
) -> objio_core::Result<(Option<Config>, Vec<String>)> {
    let storage = Storage::from_config(&config, factories())?;
    let prefixes = storage.roots(&mount.storage, &mount.parameters)?;

    if config.mounts.contains(mount) {
        return Ok((None, prefixes));
    }

    let options = if replace {
        MountOptions::replace()
    } else {
        MountOptions::default()
    };
    storage.mount_with(&mount.storage, &mount.parameters, options)?;

    if replace {
        let mut kept = Vec::with_capacity(config.mounts.len());
        for existing in config.mounts {
            let roots = storage.roots(&existing.storage, &existing.parameters)?;
            if !roots.iter().any(|root| prefixes.contains(root)) {
                kept.push(existing);
            }
        }
        config.mounts = kept;
    }

    config.mounts.push(mount.clone());
    Ok((Some(config), prefixes))
}

fn execute_remove(args: RemoveArgs, manager: &ConfigManager, formatter: &Formatter) -> ExitCode {
    let result = manager.load().and_then(|config| remove_mounts(config, &args.prefix));
    let (config, removed) = match result {
        Ok(removed) => removed,
        Err(e) => return formatter.fail(&format!("Failed to remove '{}'", args.prefix), &e),
    };

    if let Err(e) = manager.save(&config) {
        return formatter.fail("Failed to save config", &e);
    }

    if formatter.is_json() {
        formatter.json(&MountOperationOutput {
            success: true,
            storage: removed.join(","),
            prefixes: vec![args.prefix],
            message: "removed".to_string(),
        });
    } else {
        formatter.success(&format!("Removed mount at '{}'", args.prefix));
    }
    ExitCode::Success
}

/// Config without the mounts claiming `prefix`, plus their storage names
fn remove_mounts(mut config: Config, prefix: &str) -> objio_core::Result<(Config, Vec<String>)> {
    // Roots only; nothing is connected
    let storage = factories()
        .into_iter()
        .fold(Storage::builder(), StorageBuilder::factory)
        .build()?;

    let mut kept = Vec::with_capacity(config.mounts.len());
    let mut removed = Vec::new();
    for mount in config.mounts {
        let roots = storage.roots(&mount.storage, &mount.parameters)?;
        if roots.iter().any(|root| root == prefix) {
            removed.push(mount.storage);
        } else {
            kept.push(mount);
        }
    }

    if removed.is_empty() {
        return Err(Error::NotFound(format!("no configured mount at '{prefix}'")));
    }
    config.mounts = kept;
    Ok((config, removed))
}

fn parse_parameter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn redact(parameters: &StorageParameters) -> BTreeMap<String, String> {
    parameters
        .iter()
        .map(|(key, value)| {
            let shown = if SECRET_PARAMETERS.contains(&key) {
                "****".to_string()
            } else {
                value.to_string()
            };
            (key.to_string(), shown)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(root: &str, multipart: &str) -> MountConfig {
        MountConfig {
            storage: "memory".into(),
            parameters: StorageParameters::new()
                .with("root", root)
                .with("multipart", multipart),
        }
    }

    #[test]
    fn test_parse_parameter() {
        assert_eq!(
            parse_parameter("endpoint=http://h:9000/?a=b").unwrap(),
            ("endpoint".to_string(), "http://h:9000/?a=b".to_string())
        );
        assert!(parse_parameter("novalue").is_err());
        assert!(parse_parameter("=x").is_err());
    }

    #[test]
    fn test_redact_hides_secrets() {
        let params = StorageParameters::new()
            .with("access_key", "AKIA")
            .with("secret_key", "hidden");
        let shown = redact(&params);
        assert_eq!(shown["access_key"], "AKIA");
        assert_eq!(shown["secret_key"], "****");
    }

    #[test]
    fn test_add_mount_appends() {
        let (config, prefixes) = add_mount(Config::default(), &memory("a://", "true"), false).unwrap();
        assert_eq!(prefixes, vec!["a://"]);
        assert_eq!(config.unwrap().mounts.len(), 1);
    }

    #[test]
    fn test_add_identical_mount_is_noop() {
        let mut config = Config::default();
        config.mounts.push(memory("a://", "true"));
        let (config, _) = add_mount(config, &memory("a://", "true"), false).unwrap();
        assert!(config.is_none());
    }

    #[test]
    fn test_add_conflicting_mount() {
        let mut config = Config::default();
        config.mounts.push(memory("a://", "true"));

        let err = add_mount(config.clone(), &memory("a://", "false"), false).unwrap_err();
        assert!(matches!(err, Error::ConfigurationConflict(_)));

        let (replaced, _) = add_mount(config, &memory("a://", "false"), true).unwrap();
        let replaced = replaced.unwrap();
        assert_eq!(replaced.mounts, vec![memory("a://", "false")]);
    }

    #[test]
    fn test_remove_mount_by_prefix() {
        let mut config = Config::default();
        config.mounts.push(memory("a://", "true"));
        config.mounts.push(memory("b://", "true"));

        let (config, removed) = remove_mounts(config, "a://").unwrap();
        assert_eq!(removed, vec!["memory"]);
        assert_eq!(config.mounts, vec![memory("b://", "true")]);

        assert!(matches!(
            remove_mounts(config, "zzz://"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_add_then_list_through_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("config.toml"));
        let formatter = Formatter::new(crate::output::OutputConfig {
            quiet: true,
            ..Default::default()
        });
        let add = AddArgs {
            storage: "memory".into(),
            parameters: vec![("root".into(), "saved://".into())],
            replace: false,
        };
        assert_eq!(execute(MountsCommands::Add(add), &manager, &formatter), ExitCode::Success);

        let storage = open_storage(&manager).unwrap();
        let prefixes: Vec<String> = storage.mounts().iter().map(|m| m.prefix().to_string()).collect();
        assert_eq!(prefixes, vec!["saved://"]);
    }
}
