use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::Context;
use shared::domain::ReviewableKind;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub require_claims: bool,
    pub max_body_bytes: usize,
    pub bus_capacity: usize,
    /// Caller parameters forwarded to actions, per reviewable kind.
    pub allowed_params: Vec<(ReviewableKind, String)>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/reviewables.db".into(),
            require_claims: false,
            max_body_bytes: 256 * 1024,
            bus_capacity: 1024,
            allowed_params: Vec::new(),
        }
    }
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string("server.toml").ok();
    settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then `server.toml`, then environment variables. Later sources
/// win; unparsable values are logged and ignored.
pub fn settings_from(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        match toml::from_str::<toml::Table>(raw) {
            Ok(file_cfg) => {
                for (key, value) in &file_cfg {
                    let value = match value {
                        toml::Value::String(text) => text.clone(),
                        other => other.to_string(),
                    };
                    apply(&mut settings, key, &value);
                }
            }
            Err(error) => warn!(%error, "ignoring malformed server.toml"),
        }
    }

    for (env_key, key) in [
        ("SERVER_BIND", "bind_addr"),
        ("APP__BIND_ADDR", "bind_addr"),
        ("DATABASE_URL", "database_url"),
        ("APP__DATABASE_URL", "database_url"),
        ("APP__REQUIRE_CLAIMS", "require_claims"),
        ("APP__MAX_BODY_BYTES", "max_body_bytes"),
        ("APP__BUS_CAPACITY", "bus_capacity"),
        ("APP__ALLOWED_PARAMS", "allowed_params"),
    ] {
        if let Some(value) = env(env_key) {
            apply(&mut settings, key, &value);
        }
    }

    settings
}

fn apply(settings: &mut Settings, key: &str, value: &str) {
    match key {
        "bind_addr" => settings.server_bind = value.to_string(),
        "database_url" => settings.database_url = value.to_string(),
        "require_claims" => match value.parse::<bool>() {
            Ok(flag) => settings.require_claims = flag,
            Err(_) => warn!(key, value, "expected true or false"),
        },
        "max_body_bytes" => match value.parse::<usize>() {
            Ok(bytes) if bytes > 0 => settings.max_body_bytes = bytes,
            _ => warn!(key, value, "expected a positive byte count"),
        },
        "bus_capacity" => match value.parse::<usize>() {
            Ok(capacity) if capacity > 0 => settings.bus_capacity = capacity,
            _ => warn!(key, value, "expected a positive capacity"),
        },
        "allowed_params" => settings.allowed_params = parse_allowed_params(value),
        other => warn!(key = other, "ignoring unknown setting"),
    }
}

/// Parses `kind:param` pairs separated by commas, e.g.
/// `user:ban_duration,queued_post:notify_author`.
fn parse_allowed_params(raw: &str) -> Vec<(ReviewableKind, String)> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let Some((kind, param)) = entry.split_once(':') else {
                warn!(entry, "allowed param must look like kind:param");
                return None;
            };
            match ReviewableKind::from_str(kind.trim()) {
                Ok(kind) if !param.trim().is_empty() => Some((kind, param.trim().to_string())),
                Ok(_) => {
                    warn!(entry, "allowed param name is empty");
                    None
                }
                Err(error) => {
                    warn!(entry, %error, "ignoring allowed param");
                    None
                }
            }
        })
        .collect()
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
