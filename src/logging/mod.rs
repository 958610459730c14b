//! Tracing subscriber initialization and the JSONL request log.
//!
//! Diagnostics go through `tracing` to stderr. The filter is chosen by
//! priority (highest first):
//!
//! 1. `RAD_LOG` env var (directives, e.g. `rad_analyse=debug,warn`)
//! 2. `RUST_LOG` env var
//! 3. `-v` / `-q` CLI flags
//! 4. The configured `[logging] level` (only for `serve`)
//! 5. `warn`

pub mod reporter;
pub mod requests;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Verbosity level derived from CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    /// Level forced by the flags, `None` when no flag was given.
    pub const fn forced_level(self) -> Option<Level> {
        match self {
            Self::Quiet => Some(Level::ERROR),
            Self::Normal => None,
            Self::Verbose => Some(Level::DEBUG),
        }
    }
}

/// Install the global subscriber. Call once, early in `main()`.
///
/// `configured` is the `[logging] level` value; pass `None` for commands
/// that should stay quiet unless asked.
pub fn init_subscriber(verbosity: Verbosity, configured: Option<&str>) {
    let directive = resolve_directive(
        std::env::var("RAD_LOG").ok(),
        std::env::var("RUST_LOG").ok(),
        verbosity,
        configured,
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"));

    let use_ansi = std::io::IsTerminal::is_terminal(&std::io::stderr());
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_ansi)
        .with_target(verbosity == Verbosity::Verbose);

    // try_init: a second call (tests, embedded use) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer.compact())
        .try_init();
}

/// Pick the filter directive string by priority.
///
/// Unparseable env directives fall through to the next source.
pub fn resolve_directive(
    rad_log: Option<String>,
    rust_log: Option<String>,
    verbosity: Verbosity,
    configured: Option<&str>,
) -> String {
    for candidate in [rad_log, rust_log].into_iter().flatten() {
        if !candidate.trim().is_empty() && EnvFilter::try_new(&candidate).is_ok() {
            return candidate;
        }
    }

    if let Some(level) = verbosity.forced_level() {
        return level.to_string().to_lowercase();
    }

    match configured.map(str::trim) {
        Some(level) if level.parse::<Level>().is_ok() => level.to_lowercase(),
        _ => "warn".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rad_log_wins_over_everything() {
        let directive = resolve_directive(
            Some("rad_analyse=trace".to_string()),
            Some("error".to_string()),
            Verbosity::Quiet,
            Some("info"),
        );
        assert_eq!(directive, "rad_analyse=trace");
    }

    #[test]
    fn rust_log_used_when_rad_log_missing() {
        let directive =
            resolve_directive(None, Some("debug".to_string()), Verbosity::Normal, None);
        assert_eq!(directive, "debug");
    }

    #[test]
    fn invalid_env_directive_falls_through() {
        let directive = resolve_directive(
            Some("rad_analyse=loudest".to_string()),
            None,
            Verbosity::Normal,
            Some("info"),
        );
        assert_eq!(directive, "info");
    }

    #[test]
    fn flags_override_configured_level() {
        assert_eq!(
            resolve_directive(None, None, Verbosity::Verbose, Some("info")),
            "debug"
        );
        assert_eq!(
            resolve_directive(None, None, Verbosity::Quiet, Some("info")),
            "error"
        );
    }

    #[test]
    fn defaults_to_warn() {
        assert_eq!(resolve_directive(None, None, Verbosity::Normal, None), "warn");
        assert_eq!(
            resolve_directive(None, None, Verbosity::Normal, Some("loud")),
            "warn"
        );
    }

    #[test]
    fn verbosity_from_flags() {
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Quiet);
    }
}
