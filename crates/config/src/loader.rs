use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    tracing::debug,
};

use crate::{env_subst::substitute_env, schema::GatewayConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "booster.toml",
    "booster.yaml",
    "booster.yml",
    "booster.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<GatewayConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path).with_context(|| format!("failed to parse {}", path.display()))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./booster.{toml,yaml,yml,json}` (working directory)
/// 2. `~/.config/booster/booster.{toml,yaml,yml,json}` (user-global)
///
/// Returns `GatewayConfig::default()` (every engine disabled) only when no
/// config file exists. A file that is found but cannot be loaded is an error.
pub fn discover_and_load() -> anyhow::Result<GatewayConfig> {
    let mut dirs = vec![PathBuf::from(".")];
    dirs.extend(config_dir());
    discover_in(&dirs)
}

/// [`discover_and_load`] over an explicit list of directories.
pub fn discover_in(dirs: &[PathBuf]) -> anyhow::Result<GatewayConfig> {
    let Some(path) = find_config_file(dirs) else {
        debug!("no config file found, using defaults");
        return Ok(GatewayConfig::default());
    };
    debug!(path = %path.display(), "loading config");
    load_config(&path)
}

/// Find the first config file in `dirs`, honoring [`CONFIG_FILENAMES`] order
/// within each directory.
pub fn find_config_file(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)))
        .find(|p| p.exists())
}

/// Returns `~/.config/booster/` on all platforms.
pub fn config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("booster"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<GatewayConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
