//! `pym config` subcommands.
//!
//! Each handler returns the text to print so the output can be tested
//! without capturing stdout. `set` edits the file as a [`DocumentMut`], so
//! comments, key order, and unknown keys survive, but the result must
//! still parse as a [`PymConfig`] before it is written.

use std::path::{Path, PathBuf};

use pym_core::{ConfigManager, Error, PymConfig, Result};
use toml_edit::DocumentMut;

use crate::cli::ConfigAction;

/// Run a config subcommand and return its output.
pub fn handle_config_command(config_path: Option<&str>, action: ConfigAction) -> Result<String> {
    match action {
        ConfigAction::Path => config_path_report(config_path),
        ConfigAction::Get { key } => config_get(config_path, &key),
        ConfigAction::Set { key, value } => config_set(config_path, &key, &value),
        ConfigAction::Init { file, force } => config_init(file.as_deref(), force),
        ConfigAction::Export { docker_env } => {
            config_export(&PymConfig::load(config_path)?, docker_env)
        }
    }
}

fn resolved_path(config_path: Option<&str>) -> Result<PathBuf> {
    PymConfig::resolve_config_path(config_path)
        .ok_or_else(|| Error::config("Could not determine config directory for this platform"))
}

/// The config file in effect, with a hint when it does not exist yet.
pub fn config_path_report(config_path: Option<&str>) -> Result<String> {
    let path = resolved_path(config_path)?;
    let mut out = path.display().to_string();
    if !path.exists() {
        out.push_str("\n(not created yet, run `pym config init`)");
    }
    Ok(out)
}

/// Value at a dotted key of the effective configuration (file over defaults).
pub fn config_get(config_path: Option<&str>, key: &str) -> Result<String> {
    let config = PymConfig::load(config_path)?;
    let doc = toml::Value::try_from(&config).map_err(|e| Error::config(e.to_string()))?;
    lookup(&doc, key)
        .map(render_value)
        .ok_or_else(|| Error::config(format!("Unknown config key '{key}'")))
}

/// Change one key in the config file.
pub fn config_set(config_path: Option<&str>, key: &str, value: &str) -> Result<String> {
    let path = resolved_path(config_path)?;
    if !path.exists() {
        return Err(Error::config(format!(
            "No config file at {}. Run `pym config init` first.",
            path.display()
        )));
    }
    let known = toml::Value::try_from(PymConfig::default())
        .map_err(|e| Error::config(e.to_string()))?;
    let default = lookup(&known, key)
        .ok_or_else(|| Error::config(format!("Unknown config key '{key}'")))?;
    if default.is_table() {
        return Err(Error::config(format!("'{key}' is a section, set one of its keys")));
    }
    let typed = typed_value(default, value).ok_or_else(|| {
        Error::config(format!(
            "Invalid value for '{key}': expected {}, got '{value}'",
            default.type_str()
        ))
    })?;

    let mut doc = read_document(&path)?;
    assign(&mut doc, key, typed)?;
    let rendered = doc.to_string();
    toml::from_str::<PymConfig>(&rendered)
        .map_err(|e| Error::config(format!("Invalid value for '{key}': {e}")))?;
    std::fs::write(&path, rendered).map_err(|e| Error::io_with_path(e, &path))?;
    log::debug!("Wrote {}", path.display());
    Ok(format!("{key} = {value} ({})", path.display()))
}

/// Write the default configuration to `file` or the platform location.
pub fn config_init(file: Option<&str>, force: bool) -> Result<String> {
    let path = match file {
        Some(p) => PathBuf::from(p),
        None => PymConfig::default_config_path()
            .ok_or_else(|| Error::config("Could not determine config directory"))?,
    };
    if path.exists() && !force {
        return Err(Error::config(format!(
            "{} exists, pass --force to replace it",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io_with_path(e, parent))?;
    }
    std::fs::write(&path, PymConfig::default().to_toml_string()?)
        .map_err(|e| Error::io_with_path(e, &path))?;
    Ok(format!("Created {}", path.display()))
}

/// The configuration as `PYM_SECTION_KEY=value` lines.
pub fn config_export(config: &PymConfig, docker_env: bool) -> Result<String> {
    let lines: Vec<String> = config
        .to_env_vars()?
        .into_iter()
        .map(|(k, v)| {
            if docker_env {
                format!("--env {k}={v}")
            } else {
                format!("{k}={v}")
            }
        })
        .collect();
    Ok(lines.join("\n"))
}

// ============================================================================
// Dotted keys
// ============================================================================

fn read_document(path: &Path) -> Result<DocumentMut> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io_with_path(e, path))?;
    content
        .parse()
        .map_err(|e| Error::config(format!("Failed to parse {}: {e}", path.display())))
}

/// Follow `section.key` through nested tables.
pub fn lookup<'a>(doc: &'a toml::Value, key: &str) -> Option<&'a toml::Value> {
    key.split('.')
        .try_fold(doc, |node, part| node.as_table()?.get(part))
}

/// Store `value` at `section.key`, creating missing tables.
///
/// An existing key keeps its place and the comments around it.
pub fn assign(doc: &mut DocumentMut, key: &str, value: toml_edit::Value) -> Result<()> {
    let (parents, leaf) = key.rsplit_once('.').unwrap_or(("", key));
    if leaf.is_empty() {
        return Err(Error::config(format!("Invalid config key '{key}'")));
    }
    let mut node = doc.as_item_mut();
    for part in parents.split('.').filter(|p| !p.is_empty()) {
        let table = node
            .as_table_like_mut()
            .ok_or_else(|| Error::config(format!("'{part}' is not a section")))?;
        node = table.entry(part).or_insert(toml_edit::table());
    }
    let table = node
        .as_table_like_mut()
        .ok_or_else(|| Error::config(format!("Cannot set '{key}' inside a value")))?;
    match table.get_mut(leaf).and_then(|item| item.as_value_mut()) {
        Some(existing) => {
            let decor = existing.decor().clone();
            *existing = value;
            *existing.decor_mut() = decor;
        }
        None => {
            table.insert(leaf, toml_edit::value(value));
        }
    }
    Ok(())
}

/// Read a command-line value with the type of `default`.
///
/// Strings are taken verbatim, so `0123` stays a string where the key
/// holds one. `None` when the value does not parse as that type.
pub fn typed_value(default: &toml::Value, raw: &str) -> Option<toml_edit::Value> {
    match default {
        toml::Value::String(_) => Some(raw.into()),
        toml::Value::Boolean(_) => raw.parse::<bool>().ok().map(Into::into),
        toml::Value::Integer(_) => raw.parse::<i64>().ok().map(Into::into),
        toml::Value::Float(_) => raw.parse::<f64>().ok().map(Into::into),
        toml::Value::Table(_) => None,
        toml::Value::Array(_) | toml::Value::Datetime(_) => raw.parse().ok(),
    }
}

/// Scalars bare, sections as TOML.
pub fn render_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Table(_) | toml::Value::Array(_) => {
            toml::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        other => other.to_string(),
    }
}
