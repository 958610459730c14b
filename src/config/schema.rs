/// Configuration schema and defaults for rad-analyse.
///
/// Defines the TOML-serializable configuration structure with the sections
/// `[server]`, `[database]`, `[upload]`, `[cache]`, `[logging]` and
/// `[client]`.
///
/// Every field has a built-in default. Users only need to set the values
/// they want to override.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration.
///
/// Maps directly to the `~/.rad-analyse/config.toml` and `.rad-analyse.toml`
/// file schemas. Missing sections and fields fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RadConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub client: ClientConfig,
}

// ---------------------------------------------------------------------------
// [server]
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prefix under which every route is mounted, e.g. `"/rad-analyse"`.
    /// Empty string mounts at the root.
    pub base_path: String,
    /// Number of request worker threads.
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            base_path: String::new(),
            workers: 4,
        }
    }
}

impl ServerConfig {
    /// `host:port` pair for binding the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base path normalized to either `""` or `"/segment"` without a
    /// trailing slash.
    pub fn normalized_base_path(&self) -> String {
        let trimmed = self.base_path.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        }
    }
}

// ---------------------------------------------------------------------------
// [database]
// ---------------------------------------------------------------------------

/// SQLite store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite file. `~` is expanded to the home directory.
    pub path: String,
    /// Rows per page served by `GET /api/studies`.
    pub query_limit: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.rad-analyse/studies.sqlite3".to_string(),
            query_limit: 200,
        }
    }
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

// ---------------------------------------------------------------------------
// [upload]
// ---------------------------------------------------------------------------

/// Upload limits shared by the server endpoint and the client queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest accepted file in bytes (default 50 MiB).
    pub max_size_bytes: u64,
    /// Simultaneous transfers allowed by the client queue.
    pub max_concurrent: usize,
    /// Largest accepted request body of one upload request (default 256 MiB).
    pub max_request_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 50 * 1024 * 1024,
            max_concurrent: 3,
            max_request_bytes: 256 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// [cache]
// ---------------------------------------------------------------------------

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_keys: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 3600,
            max_keys: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// [logging]
// ---------------------------------------------------------------------------

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    pub level: String,
    /// Directory for the JSONL request log. `~` is expanded.
    pub dir: String,
    /// Whether every HTTP request is appended to `requests.jsonl`.
    pub request_log: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "~/.rad-analyse/logs".to_string(),
            request_log: true,
        }
    }
}

impl LoggingConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        expand_home(&self.dir)
    }
}

// ---------------------------------------------------------------------------
// [client]
// ---------------------------------------------------------------------------

/// Settings for the table engine and the terminal client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server the client talks to, including any base path.
    pub server_url: String,
    /// Fixed row height used for the virtualization window (px).
    pub row_height: u32,
    /// Rows rendered above and below the visible range.
    pub render_buffer: usize,
    /// Deferred DOM writes applied per animation frame.
    pub batch_size: usize,
    /// Distance from the document bottom that triggers the next page (px).
    pub scroll_threshold: u32,
    /// Quiet period for search boxes and the scroll trigger (ms).
    pub debounce_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".to_string(),
            row_height: 40,
            render_buffer: 10,
            batch_size: 50,
            scroll_threshold: 500,
            debounce_ms: 300,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    if path == "~"
        && let Some(home) = dirs::home_dir()
    {
        return home;
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// Default TOML content
// ---------------------------------------------------------------------------

impl RadConfig {
    /// Generate the annotated default TOML config file content.
    ///
    /// Used by `rad-analyse config init`.
    pub fn default_toml() -> String {
        r#"# rad-analyse configuration
#
# Configuration hierarchy (highest precedence wins):
#   1. Environment variables (RAD_*)
#   2. Project config (.rad-analyse.toml in current directory)
#   3. User global config (~/.rad-analyse/config.toml)
#   4. Built-in defaults

[server]
host = "127.0.0.1"
port = 3000
base_path = ""        # e.g. "/rad-analyse"
workers = 4

[database]
path = "~/.rad-analyse/studies.sqlite3"
query_limit = 200     # rows per page

[upload]
max_size_bytes = 52428800   # 50 MiB
max_concurrent = 3
max_request_bytes = 268435456   # 256 MiB per request

[cache]
enabled = false
ttl_secs = 3600
max_keys = 1000

[logging]
level = "info"        # error | warn | info | debug | trace
dir = "~/.rad-analyse/logs"
request_log = true

[client]
server_url = "http://127.0.0.1:3000"
row_height = 40
render_buffer = 10
batch_size = 50
scroll_threshold = 500
debounce_ms = 300
"#
        .to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
