use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    schema::{DrydockConfig, SandboxBackendKind},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["drydock.toml", "drydock.yaml", "drydock.yml", "drydock.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<DrydockConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./drydock.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/drydock/drydock.{toml,yaml,yml,json}` (user-global)
///
/// Returns `DrydockConfig::default()` if no config file is found.
/// `DRYDOCK_*` environment overrides are applied last in either case.
pub fn discover_and_load() -> DrydockConfig {
    let mut cfg = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            match load_config(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                    DrydockConfig::default()
                },
            }
        },
        None => {
            debug!("no config file found, using defaults");
            DrydockConfig::default()
        },
    };
    apply_env_overrides(&mut cfg);
    cfg
}

/// Apply `DRYDOCK_*` environment variable overrides on top of a loaded
/// config. Invalid values are ignored with a warning.
fn apply_env_overrides(cfg: &mut DrydockConfig) {
    if let Ok(dir) = std::env::var("DRYDOCK_WORKSPACE_DIR")
        && !dir.is_empty()
    {
        cfg.workspace.dir = Some(PathBuf::from(dir));
    }
    if let Ok(raw) = std::env::var("DRYDOCK_TIMEOUT_SECS") {
        match raw.parse::<u64>() {
            Ok(secs) => cfg.exec.timeout_secs = secs,
            Err(_) => warn!(value = %raw, "ignoring invalid DRYDOCK_TIMEOUT_SECS"),
        }
    }
    if let Ok(raw) = std::env::var("DRYDOCK_SANDBOX_BACKEND") {
        match raw.as_str() {
            "local" => cfg.sandbox.backend = SandboxBackendKind::Local,
            "container" => cfg.sandbox.backend = SandboxBackendKind::Container,
            _ => warn!(value = %raw, "ignoring invalid DRYDOCK_SANDBOX_BACKEND"),
        }
    }
    // Provisioning-side knob; see `RunAsConfig::uid`.
    if let Ok(raw) = std::env::var("DRYDOCK_SANDBOX_USER_ID") {
        match raw.parse::<u32>() {
            Ok(uid) => cfg.sandbox.run_as.uid = uid,
            Err(_) => warn!(value = %raw, "ignoring invalid DRYDOCK_SANDBOX_USER_ID"),
        }
    }
    if let Ok(image) = std::env::var("DRYDOCK_SANDBOX_IMAGE")
        && !image.is_empty()
    {
        cfg.sandbox.image = Some(image);
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/drydock/
    if let Some(dir) = config_dir() {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/drydock/`).
fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "drydock").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<DrydockConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drydock.toml");
        std::fs::write(&path, "[exec]\ntimeout_secs = 7\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.exec.timeout_secs, 7);
    }

    #[test]
    fn load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drydock.json");
        std::fs::write(&path, r#"{"sandbox": {"backend": "container"}}"#).unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.sandbox.backend, SandboxBackendKind::Container);
    }

    #[test]
    fn unknown_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drydock.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(load_config(&path).is_err());
    }
}
