use crate::config::Config;
use crate::utils::get_fbrelay_home;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Flat top-level keys from the legacy messenger plugin config, moved under `messenger`.
const LEGACY_MESSENGER_KEYS: &[(&str, &str)] = &[
    ("accessToken", "pageAccessToken"),
    ("displayGetStarted", "displayGetStarted"),
    ("autoResponseOption", "autoResponseOption"),
    ("autoResponseText", "autoResponseText"),
    ("autoResponsePostback", "autoResponsePostback"),
];

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_fbrelay_home()?.join("config.json"))
}

pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let default_path = get_config_path().unwrap_or_else(|_| PathBuf::from("config.json"));
    let path = config_path.unwrap_or(default_path.as_path());

    let mut config = if path.exists() {
        // Shared lock: concurrent readers fine, blocks while a writer holds it
        let file = fs::File::open(path)
            .with_context(|| format!("Failed to open config at {}", path.display()))?;
        file.lock_shared()
            .with_context(|| "Failed to acquire shared lock on config file")?;

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let data: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON from {}", path.display()))?;
        let data = migrate_config(data);

        check_file_permissions(path);
        serde_json::from_value(data).with_context(|| "Failed to deserialize config")?
    } else {
        Config::default()
    };

    crate::config::credentials::apply_env_overrides(&mut config);

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;
    Ok(config)
}

/// Where the ref store lives when the config doesn't say.
pub fn ref_store_path(config: &Config) -> Result<PathBuf> {
    match &config.ref_store.path {
        Some(path) => Ok(path.clone()),
        None => Ok(get_fbrelay_home()?.join("refs.db")),
    }
}

/// Warn if the config file holds secrets and is readable by others.
#[cfg(unix)]
fn check_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode();
        if mode & 0o077 != 0 {
            warn!(
                "config file {} has permissions {:o}, recommend 0600",
                path.display(),
                mode & 0o777
            );
        }
    }
}

#[cfg(not(unix))]
fn check_file_permissions(_path: &Path) {}

fn migrate_config(data: Value) -> Value {
    let mut map = match data {
        Value::Object(map) => map,
        other => return other,
    };

    let legacy: Vec<(&str, Value)> = LEGACY_MESSENGER_KEYS
        .iter()
        .filter_map(|(old, new)| map.remove(*old).map(|v| (*new, v)))
        .collect();
    if legacy.is_empty() {
        return Value::Object(map);
    }

    let messenger = map
        .entry("messenger")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if let Value::Object(messenger) = messenger {
        for (key, value) in legacy {
            // An explicit nested value always wins over the legacy flat one
            messenger.entry(key).or_insert(value);
        }
    }
    Value::Object(map)
}
