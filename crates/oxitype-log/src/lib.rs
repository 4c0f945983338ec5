//! A minimal, zero-dependency logging crate for the `OxiType` runtime.
//!
//! This crate provides thread-safe logging with automatic module path detection,
//! colored terminal output, configurable log levels, and a dedicated
//! `Critical` level for programming errors reported by the runtime.
//!
//! # Example
//!
//! ```
//! use oxitype_log::{critical, error, warn, info, debug, Level};
//!
//! // Set the minimum log level
//! oxitype_log::set_level(Level::Debug);
//!
//! let status = "running";
//! info!("Application is {}", status);
//! debug!("Debug information: {:?}", vec![1, 2, 3]);
//! warn!("This is a warning");
//! error!("This is an error message");
//! critical!("assertion '{}' failed", "object != NULL");
//! ```
//!
//! # Fatal warnings
//!
//! When [`set_fatal_warnings`] is enabled, every `Warn` and `Critical` record
//! aborts the process right after it has been written, so the first misuse
//! is captured at the call site. Records collected by [`capture`] never
//! abort.

use std::cell::RefCell;
use std::fmt::{self, Arguments};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{OnceLock, RwLock};

/// Log levels representing the severity/priority of log messages.
///
/// `Levels` are ordered from most severe (Critical) to least severe (Trace).
/// Lower numeric values indicate higher severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Critical level - programming errors detected by the runtime
    Critical = 0,
    /// Error level - critical failures and errors
    Error = 1,
    /// Warning level - potentially harmful situations
    Warn = 2,
    /// Info level - informational messages
    Info = 3,
    /// Debug level - detailed diagnostic information
    Debug = 4,
    /// Trace level - most detailed tracing information
    Trace = 5,
}

impl Level {
    /// Returns the ANSI color code for this log level.
    const fn color_code(&self) -> &'static str {
        match self {
            Level::Critical => "\x1b[1;31m", // Bold red
            Level::Error => "\x1b[31m",      // Red
            Level::Warn => "\x1b[33m",       // Yellow
            Level::Info => "\x1b[32m",       // Green
            Level::Debug => "\x1b[36m",      // Cyan
            Level::Trace => "\x1b[35m",      // Magenta
        }
    }

    /// Returns the string representation of this log level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Level::Critical => "CRITICAL",
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn from_u8(raw: u8) -> Level {
        match raw {
            0 => Level::Critical,
            1 => Level::Error,
            2 => Level::Warn,
            3 => Level::Info,
            4 => Level::Debug,
            _ => Level::Trace,
        }
    }

    /// Parses a string into a Level.
    ///
    /// # Example
    ///
    /// ```
    /// use oxitype_log::Level;
    ///
    /// assert_eq!(Level::from_str("error"), Ok(Level::Error));
    /// assert_eq!(Level::from_str("INFO"), Ok(Level::Info));
    /// assert!(Level::from_str("invalid").is_err());
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_uppercase().as_str() {
            "CRITICAL" => Ok(Level::Critical),
            "ERROR" => Ok(Level::Error),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "INFO" => Ok(Level::Info),
            "DEBUG" => Ok(Level::Debug),
            "TRACE" => Ok(Level::Trace),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }

    /// Returns true if records at this level are subject to the fatal switch.
    pub const fn is_warning(&self) -> bool {
        matches!(self, Level::Critical | Level::Warn)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single formatted log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Severity of the record.
    pub level: Level,
    /// Module path of the call site.
    pub target: String,
    /// Formatted message.
    pub message: String,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.target, self.message)
    }
}

/// Destination for log records.
///
/// The default sink writes colored lines to stderr. Install a custom sink with
/// [`set_sink`] to route records elsewhere.
pub trait Sink: Send + Sync {
    /// Writes one record.
    fn write(&self, record: &Record);
}

/// Default sink: colored output on stderr.
pub struct StderrSink;

impl Sink for StderrSink {
    fn write(&self, record: &Record) {
        static RESET: &str = "\x1b[0m";
        let color = record.level.color_code();
        eprintln!(
            "{color}[{}]{RESET} {}: {}",
            record.level.as_str(),
            record.target,
            record.message
        );
    }
}

/// The global logger instance.
///
/// This struct uses atomic operations for thread-safe level management.
/// It is intended to be used as a singleton via `get_logger()`.
pub struct Logger {
    level: AtomicU8,
    fatal_warnings: AtomicBool,
    sink: RwLock<Option<Box<dyn Sink>>>,
}

impl Logger {
    /// Creates a new logger with the specified minimum level.
    const fn new(level: Level) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
            fatal_warnings: AtomicBool::new(false),
            sink: RwLock::new(None),
        }
    }

    /// Sets the minimum log level.
    ///
    /// Messages below this level will not be logged. `Critical` records are
    /// always logged.
    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::SeqCst);
    }

    /// Returns the current minimum log level.
    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Checks if a message at the given level would be logged.
    pub fn enabled(&self, level: Level) -> bool {
        level == Level::Critical || level as u8 <= self.level.load(Ordering::Relaxed)
    }

    /// Enables or disables aborting on warnings and criticals.
    pub fn set_fatal_warnings(&self, fatal: bool) {
        self.fatal_warnings.store(fatal, Ordering::SeqCst);
    }

    /// Returns true if warnings and criticals abort the process.
    pub fn fatal_warnings(&self) -> bool {
        self.fatal_warnings.load(Ordering::Relaxed)
    }

    fn dispatch(&self, record: &Record) {
        let sink = self
            .sink
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match sink.as_deref() {
            Some(sink) => sink.write(record),
            None => StderrSink.write(record),
        }
    }
}

/// Global logger singleton.
static LOGGER: OnceLock<Logger> = OnceLock::new();

thread_local! {
    /// Stack of active captures on this thread (innermost last).
    static CAPTURES: RefCell<Vec<Vec<Record>>> = const { RefCell::new(Vec::new()) };
}

/// Returns a reference to the global logger instance.
///
/// This initializes the logger on first call with `Level::Info` as the default level.
///
/// # Example
///
/// ```
/// use oxitype_log::get_logger;
///
/// let logger = get_logger();
/// logger.set_level(oxitype_log::Level::Debug);
/// ```
pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(Level::Info))
}

/// Sets the minimum log level for the global logger.
///
/// # Example
///
/// ```
/// use oxitype_log::{set_level, Level};
///
/// set_level(Level::Debug);
/// ```
pub fn set_level(level: Level) {
    get_logger().set_level(level);
}

/// Sets the minimum log level from a string.
///
/// # Example
///
/// ```
/// use oxitype_log::set_level_from_str;
///
/// set_level_from_str("debug").unwrap();
/// ```
pub fn set_level_from_str(s: &str) -> Result<(), String> {
    let level = Level::from_str(s)?;
    set_level(level);
    Ok(())
}

/// Makes warnings and criticals abort the process after being written.
pub fn set_fatal_warnings(fatal: bool) {
    get_logger().set_fatal_warnings(fatal);
}

/// Replaces the output sink. `None` restores the stderr sink.
pub fn set_sink(sink: Option<Box<dyn Sink>>) {
    let mut slot = get_logger()
        .sink
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    *slot = sink;
}

/// Runs `f` and returns every record logged on this thread while it ran.
///
/// Captured records are not forwarded to the sink and never trigger the
/// fatal-warnings abort. Captures nest; a record goes to the innermost one.
///
/// # Example
///
/// ```
/// use oxitype_log::{capture, critical, Level};
///
/// let ((), records) = capture(|| critical!("bad cast"));
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0].level, Level::Critical);
/// ```
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Vec<Record>) {
    CAPTURES.with(|stack| stack.borrow_mut().push(Vec::new()));

    struct PopOnUnwind;
    impl Drop for PopOnUnwind {
        fn drop(&mut self) {
            if std::thread::panicking() {
                CAPTURES.with(|stack| {
                    stack.borrow_mut().pop();
                });
            }
        }
    }

    let guard = PopOnUnwind;
    let result = f();
    std::mem::forget(guard);

    let records = CAPTURES.with(|stack| stack.borrow_mut().pop().unwrap_or_default());
    (result, records)
}

/// Internal function that performs the actual logging.
///
/// This function is called by the log macros after checking if the level is enabled.
#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments) {
    let logger = get_logger();
    if !logger.enabled(level) {
        return;
    }

    let record = Record {
        level,
        target: target.to_string(),
        message: args.to_string(),
    };

    let captured = CAPTURES.with(|stack| {
        // A sink that logs from inside `write` must not re-enter the borrow.
        let Ok(mut stack) = stack.try_borrow_mut() else {
            return false;
        };
        match stack.last_mut() {
            Some(top) => {
                top.push(record.clone());
                true
            }
            None => false,
        }
    });
    if captured {
        return;
    }

    logger.dispatch(&record);

    if level.is_warning() && logger.fatal_warnings() {
        std::process::abort();
    }
}

/// The primary logging macro.
///
/// Logs a message at the specified level. The macro automatically captures
/// the module path where it was called.
///
/// # Example
///
/// ```
/// use oxitype_log::{log, Level};
///
/// # oxitype_log::set_level(Level::Info);
/// log!(level: Level::Info, "This is an info message: {}", 42);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {
        {
            if $crate::get_logger().enabled($level) {
                $crate::__log_with_target(
                    $level,
                    module_path!(),
                    format_args!($($arg)*)
                );
            }
        }
    };
}

/// Logs a programming error at the Critical level.
///
/// # Example
///
/// ```
/// use oxitype_log::critical;
///
/// # oxitype_log::capture(|| {
/// critical!("invalid cast from '{}' to '{}'", "Animal", "Stone");
/// # });
/// ```
#[macro_export]
macro_rules! critical {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Critical, $($arg)*)
    };
}

/// Logs a message at the Error level.
///
/// # Example
///
/// ```
/// use oxitype_log::error;
///
/// # let path = "/tmp/test.txt";
/// error!("Failed to open file: {}", path);
/// ```
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Error, $($arg)*)
    };
}

/// Logs a message at the Warn level.
///
/// # Example
///
/// ```
/// use oxitype_log::warn;
///
/// # oxitype_log::set_level(oxitype_log::Level::Warn);
/// warn!("Deprecated feature used");
/// ```
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Warn, $($arg)*)
    };
}

/// Logs a message at the Info level.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Info, $($arg)*)
    };
}

/// Logs a message at the Debug level.
///
/// # Example
///
/// ```
/// use oxitype_log::debug;
///
/// # let request = vec![1, 2, 3];
/// # oxitype_log::set_level(oxitype_log::Level::Debug);
/// debug!("Processing request: {:?}", request);
/// ```
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Debug, $($arg)*)
    };
}

/// Logs a message at the Trace level.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Trace, $($arg)*)
    };
}
