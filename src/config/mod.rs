/// Configuration system for rad-analyse.
///
/// Provides a layered configuration hierarchy:
///
/// 1. **Built-in defaults** - hardcoded in [`schema::RadConfig::default()`]
/// 2. **User global config** - `~/.rad-analyse/config.toml`
/// 3. **Project local config** - `.rad-analyse.toml` in the current directory
/// 4. **Environment variables** - `RAD_*` overrides (highest precedence)
///
/// TOML layers are merged at the key level: a project file that only sets
/// `[server] port` keeps every other value from the global file.
///
/// # Usage
///
/// ```rust,ignore
/// use rad_analyse::config;
///
/// let cfg = config::load();
/// println!("listening on {}", cfg.server.bind_addr());
/// ```
pub mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub use schema::{ClientConfig, RadConfig};

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load the fully resolved configuration.
///
/// Merges defaults → global TOML → project TOML → env vars. This is the
/// primary entry point for all modules that need configuration.
pub fn load() -> RadConfig {
    load_layers(
        global_config_path().as_deref(),
        project_config_path().as_deref(),
        |key| std::env::var(key).ok(),
    )
}

/// Resolve configuration from explicit layer sources.
///
/// Unreadable or malformed TOML files are skipped with a warning so a bad
/// file never prevents the server from starting with defaults.
pub fn load_layers(
    global: Option<&Path>,
    project: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> RadConfig {
    let mut merged = toml::Value::Table(toml::map::Map::new());

    for path in [global, project].into_iter().flatten() {
        if let Some(layer) = load_toml_value(path) {
            merge_toml(&mut merged, layer);
        }
    }

    let mut config = match merged.try_into::<RadConfig>() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "config layers do not match the schema, using defaults");
            RadConfig::default()
        }
    };

    apply_env_overrides(&mut config, env);
    config
}

/// Read a TOML file as an untyped value tree.
fn load_toml_value(path: &Path) -> Option<toml::Value> {
    let content = fs::read_to_string(path).ok()?;
    match toml::from_str::<toml::Value>(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config file");
            None
        }
    }
}

/// Merge `overlay` into `base`, recursing into tables. Non-table values in
/// the overlay replace the base value.
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

// ---------------------------------------------------------------------------
// File paths
// ---------------------------------------------------------------------------

/// Directory holding global config, database, logs and client state.
pub fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".rad-analyse"))
}

/// Path to the user global config: `~/.rad-analyse/config.toml`.
fn global_config_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("config.toml"))
}

/// Path to the project local config: `.rad-analyse.toml` in the current directory.
fn project_config_path() -> Option<PathBuf> {
    std::env::current_dir()
        .ok()
        .map(|cwd| cwd.join(".rad-analyse.toml"))
}

/// Return the path to the global config file for display/init purposes.
pub fn global_config_file() -> Option<PathBuf> {
    global_config_path()
}

/// Return the path to the project config file for display purposes.
pub fn project_config_file() -> Option<PathBuf> {
    project_config_path()
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides (highest precedence layer).
///
/// Supported variables:
/// - `RAD_HOST`, `RAD_PORT` (1-65535), `RAD_BASE_PATH`
/// - `RAD_DB_PATH`, `RAD_QUERY_LIMIT`
/// - `RAD_MAX_UPLOAD_SIZE` (bytes)
/// - `RAD_CACHE_ENABLED`, `RAD_CACHE_TTL` (seconds)
/// - `RAD_LOG_LEVEL`, `RAD_LOG_PATH`
/// - `RAD_SERVER_URL` (client side)
///
/// Values that fail to parse are ignored.
fn apply_env_overrides(config: &mut RadConfig, env: impl Fn(&str) -> Option<String>) {
    // Server
    if let Some(val) = env("RAD_HOST")
        && !val.is_empty()
    {
        config.server.host = val;
    }
    if let Some(val) = env("RAD_PORT")
        && let Some(port) = parse_port(&val)
    {
        config.server.port = port;
    }
    if let Some(val) = env("RAD_BASE_PATH") {
        config.server.base_path = val;
    }

    // Database
    if let Some(val) = env("RAD_DB_PATH")
        && !val.is_empty()
    {
        config.database.path = val;
    }
    if let Some(val) = env("RAD_QUERY_LIMIT")
        && let Ok(limit) = val.parse::<u32>()
        && limit > 0
    {
        config.database.query_limit = limit;
    }

    // Upload
    if let Some(val) = env("RAD_MAX_UPLOAD_SIZE")
        && let Ok(bytes) = val.parse::<u64>()
    {
        config.upload.max_size_bytes = bytes;
    }

    // Cache
    if let Some(val) = env("RAD_CACHE_ENABLED") {
        config.cache.enabled = is_truthy(&val);
    }
    if let Some(val) = env("RAD_CACHE_TTL")
        && let Ok(secs) = val.parse::<u64>()
    {
        config.cache.ttl_secs = secs;
    }

    // Logging
    if let Some(val) = env("RAD_LOG_LEVEL")
        && !val.is_empty()
    {
        config.logging.level = val;
    }
    if let Some(val) = env("RAD_LOG_PATH")
        && !val.is_empty()
    {
        config.logging.dir = val;
    }

    // Client
    if let Some(val) = env("RAD_SERVER_URL")
        && !val.is_empty()
    {
        config.client.server_url = val;
    }
}

/// Check if a string value represents a truthy boolean.
fn is_truthy(val: &str) -> bool {
    matches!(
        val.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse a TCP port, rejecting 0.
fn parse_port(val: &str) -> Option<u16> {
    val.trim().parse::<u16>().ok().filter(|&p| p > 0)
}

// ---------------------------------------------------------------------------
// Config init / set / reset
// ---------------------------------------------------------------------------

/// Write the default annotated config to `~/.rad-analyse/config.toml`.
///
/// Returns an error if the file already exists (use `force = true` to
/// overwrite).
pub fn init_config(force: bool) -> Result<PathBuf> {
    let path = global_config_path().context("could not determine home directory")?;

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create ~/.rad-analyse/ directory")?;
    }

    fs::write(&path, RadConfig::default_toml()).context("failed to write config file")?;

    Ok(path)
}

/// Set a single config key to a value in the global config file.
///
/// Supports dotted keys like `cache.enabled`. The new value is typed after
/// the existing value (bool, integer, float, string).
pub fn set_config_value(key: &str, value: &str) -> Result<()> {
    let path = global_config_path().context("could not determine home directory")?;

    let content = if path.exists() {
        fs::read_to_string(&path).context("failed to read config file")?
    } else {
        toml::to_string_pretty(&RadConfig::default())
            .context("failed to serialize default config")?
    };

    let mut root: toml::Value =
        toml::from_str(&content).context("failed to parse config as TOML value")?;
    set_toml_value(&mut root, key, value)?;

    // Reject values that would no longer deserialize into the schema.
    root.clone()
        .try_into::<RadConfig>()
        .with_context(|| format!("invalid value '{value}' for '{key}'"))?;

    let output = toml::to_string_pretty(&root).context("failed to serialize updated config")?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create config directory")?;
    }
    fs::write(&path, output).context("failed to write config file")?;

    Ok(())
}

/// Set a value in a TOML value tree using a dotted key path.
fn set_toml_value(root: &mut toml::Value, key: &str, raw_value: &str) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        anyhow::bail!("invalid config key '{key}'");
    }

    let mut current = root;
    for &part in &parts[..parts.len() - 1] {
        current = current
            .get_mut(part)
            .with_context(|| format!("config key not found: section '{part}' in '{key}'"))?;
    }

    let leaf = parts[parts.len() - 1];
    let table = current.as_table_mut().with_context(|| {
        format!(
            "expected table at '{}'",
            key.rsplit_once('.').map(|(s, _)| s).unwrap_or("")
        )
    })?;

    let new_value = match table.get(leaf) {
        Some(toml::Value::Boolean(_)) => toml::Value::Boolean(is_truthy(raw_value)),
        Some(toml::Value::Integer(_)) => {
            let n: i64 = raw_value
                .parse()
                .with_context(|| format!("expected integer for '{key}', got '{raw_value}'"))?;
            toml::Value::Integer(n)
        }
        Some(toml::Value::Float(_)) => {
            let f: f64 = raw_value
                .parse()
                .with_context(|| format!("expected float for '{key}', got '{raw_value}'"))?;
            toml::Value::Float(f)
        }
        Some(_) => toml::Value::String(raw_value.to_string()),
        None => anyhow::bail!("unknown config key '{key}'"),
    };

    table.insert(leaf.to_string(), new_value);
    Ok(())
}

/// Reset the global config to defaults (overwrite the file).
pub fn reset_config() -> Result<PathBuf> {
    init_config(true)
}

/// Show the effective (fully resolved) config as TOML.
pub fn show_effective_config() -> Result<String> {
    let config = load();
    toml::to_string_pretty(&config).context("failed to serialize effective config")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
