//! # Backup Profile Reader
//!
//! Reads `~/.hashedbackup/profiles`, an INI file where each section names a
//! profile and gives its `src`/`dst`/`namespace` (plus optional
//! `symlink`/`hardlink` booleans), so `backup-profile <name>` can stand in
//! for a full `backup <src> <dst> -n <namespace>` invocation.

use crate::backend::StoreMode;
use crate::error::{HbError, Result};
use crate::snapshot;
use ini::Ini;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Profile {
    pub src: PathBuf,
    pub dst: String,
    pub namespace: String,
    pub store_mode: StoreMode,
}

fn default_profiles_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HbError::InvalidConfig("could not determine home directory".to_string()))?;
    Ok(home.join(".hashedbackup").join("profiles"))
}

fn expand_leading_tilde(value: &str) -> Result<String> {
    match value.strip_prefix('~') {
        Some(rest) => {
            let home = dirs::home_dir().ok_or_else(|| {
                HbError::InvalidConfig("could not determine home directory".to_string())
            })?;
            Ok(format!("{}{}", home.display(), rest))
        }
        None => Ok(value.to_string()),
    }
}

fn parse_bool(value: Option<&str>) -> bool {
    matches!(
        value.map(str::to_ascii_lowercase).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

/// Loads a named profile (or `"default"` when `name` is `None`) from the
/// given profile file. A missing required key is `InvalidConfig`.
fn load_from_path(path: &Path, name: Option<&str>) -> Result<Profile> {
    let ini = Ini::load_from_file(path)
        .map_err(|e| HbError::InvalidConfig(format!("reading {}: {e}", path.display())))?;

    let section_name = name.unwrap_or("default");
    let section = ini.section(Some(section_name)).ok_or_else(|| {
        HbError::InvalidConfig(format!(
            "no profile named '{section_name}' in {}",
            path.display()
        ))
    })?;

    let required = |key: &str| -> Result<String> {
        section.get(key).map(str::to_string).ok_or_else(|| {
            HbError::InvalidConfig(format!(
                "profile '{section_name}' is missing required key '{key}'"
            ))
        })
    };

    let src = expand_leading_tilde(&required("src")?)?;
    let dst = expand_leading_tilde(&required("dst")?)?;
    let namespace = required("namespace")?;
    let store_mode = snapshot::resolve_store_mode(
        parse_bool(section.get("symlink")),
        parse_bool(section.get("hardlink")),
    )?;

    Ok(Profile {
        src: PathBuf::from(src),
        dst,
        namespace,
        store_mode,
    })
}

pub fn load(name: Option<&str>) -> Result<Profile> {
    load_from_path(&default_profiles_path()?, name)
}
