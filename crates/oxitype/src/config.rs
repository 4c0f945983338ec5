//! Runtime configuration read from the environment.
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `OXITYPE_DEBUG` | comma or colon separated: `fatal-warnings`, `objects`, `all` |
//! | `OXITYPE_LOG` | minimum log level (`error`, `warn`, `info`, `debug`, `trace`) |
//!
//! The configuration is applied once by [`init`]; the type registry calls it
//! on first use. The setters below override it at runtime.
//!
//! With `objects` set, call [`shutdown`] before the process exits to log the
//! instances that are still alive.

use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use oxitype_log::Level;

/// Environment variable holding debug switches.
pub const DEBUG_ENV: &str = "OXITYPE_DEBUG";

/// Environment variable holding the log level.
pub const LOG_ENV: &str = "OXITYPE_LOG";

static DEBUG_OBJECTS: AtomicBool = AtomicBool::new(false);

/// Settings derived from the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Abort on every warning and programming error.
    pub fatal_warnings: bool,
    /// Track live instances for leak reports.
    pub debug_objects: bool,
    /// Minimum log level, if overridden.
    pub log_level: Option<Level>,
}

impl RuntimeConfig {
    /// Reads the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let debug = std::env::var(DEBUG_ENV).unwrap_or_default();
        let level = std::env::var(LOG_ENV).ok();
        Self::parse(&debug, level.as_deref())
    }

    /// Parses the debug switch list and log level.
    ///
    /// Unknown switches and level names are ignored with a warning.
    ///
    /// # Example
    ///
    /// ```
    /// use oxitype::config::RuntimeConfig;
    ///
    /// let cfg = RuntimeConfig::parse("objects:fatal-warnings", Some("debug"));
    /// assert!(cfg.debug_objects);
    /// assert!(cfg.fatal_warnings);
    /// ```
    #[must_use]
    pub fn parse(debug: &str, level: Option<&str>) -> Self {
        let mut cfg = RuntimeConfig::default();

        for key in debug
            .split([',', ':'])
            .map(str::trim)
            .filter(|k| !k.is_empty())
        {
            match key {
                "fatal-warnings" | "fatal_warnings" => cfg.fatal_warnings = true,
                "objects" => cfg.debug_objects = true,
                "all" => {
                    cfg.fatal_warnings = true;
                    cfg.debug_objects = true;
                }
                other => oxitype_log::warn!("unknown {} key '{}'", DEBUG_ENV, other),
            }
        }

        if let Some(raw) = level {
            match Level::from_str(raw) {
                Ok(level) => cfg.log_level = Some(level),
                Err(err) => oxitype_log::warn!("{}: {}", LOG_ENV, err),
            }
        }

        cfg
    }

    /// Applies the configuration to the logger and the debug switches.
    pub fn apply(&self) {
        if let Some(level) = self.log_level {
            oxitype_log::set_level(level);
        }
        if self.fatal_warnings {
            set_fatal_warnings(true);
        }
        if self.debug_objects {
            set_debug_objects(true);
        }
    }
}

/// Reads and applies the environment configuration once per process.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let cfg = RuntimeConfig::from_env();
        cfg.apply();
        oxitype_log::debug!("runtime configured: {:?}", cfg);
    });
}

/// Turns programming errors and warnings into process aborts.
pub fn set_fatal_warnings(fatal: bool) {
    oxitype_log::set_fatal_warnings(fatal);
}

/// Enables live-instance accounting for instances created from now on.
pub fn set_debug_objects(enabled: bool) {
    DEBUG_OBJECTS.store(enabled, Ordering::SeqCst);
}

/// Logs a warning for every tracked instance still alive and returns how
/// many there are.
///
/// Only instances created while live-instance accounting was enabled are
/// reported; without it this logs nothing and returns 0.
pub fn shutdown() -> usize {
    let leaked = crate::runtime::debug::report_leaks();
    if leaked > 0 {
        oxitype_log::debug!("shutdown with {} leaked instance(s)", leaked);
    }
    leaked
}

/// Returns true if live-instance accounting is enabled.
#[must_use]
pub fn debug_objects() -> bool {
    DEBUG_OBJECTS.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(RuntimeConfig::parse("", None), RuntimeConfig::default());
    }

    #[test]
    fn test_parse_switches() {
        let cfg = RuntimeConfig::parse("objects", None);
        assert!(cfg.debug_objects);
        assert!(!cfg.fatal_warnings);

        let cfg = RuntimeConfig::parse(" fatal-warnings , objects ", None);
        assert!(cfg.debug_objects);
        assert!(cfg.fatal_warnings);

        let cfg = RuntimeConfig::parse("all", None);
        assert!(cfg.debug_objects && cfg.fatal_warnings);
    }

    #[test]
    fn test_parse_level() {
        let cfg = RuntimeConfig::parse("", Some("trace"));
        assert_eq!(cfg.log_level, Some(Level::Trace));

        let (cfg, records) =
            oxitype_log::capture(|| RuntimeConfig::parse("bogus", Some("loud")));
        assert_eq!(cfg.log_level, None);
        assert_eq!(records.len(), 2);
    }
}
