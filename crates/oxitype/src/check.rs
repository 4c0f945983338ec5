//! Programming-error reporting.
//!
//! Misuse of the runtime (bad casts, unknown properties, wrong argument types)
//! is reported through the logging sink at the critical level. Under the
//! fatal-warnings switch the process aborts at the report site.

use std::fmt::Arguments;

use oxitype_log::Level;

/// Reports a programming error from `target`.
///
/// With the `critical_backtrace` feature the record carries a backtrace of
/// the reporting thread.
#[doc(hidden)]
#[cold]
pub fn report(target: &str, args: Arguments<'_>) {
    #[cfg(feature = "critical_backtrace")]
    {
        let trace = backtrace::Backtrace::new();
        oxitype_log::__log_with_target(
            Level::Critical,
            target,
            format_args!("{args}\n{trace:?}"),
        );
    }

    #[cfg(not(feature = "critical_backtrace"))]
    oxitype_log::__log_with_target(Level::Critical, target, args);
}

/// Logs a programming error at the call site.
macro_rules! critical {
    ($($arg:tt)*) => {
        $crate::check::report(module_path!(), format_args!($($arg)*))
    };
}

/// Returns from the current function if `cond` is false, reporting the
/// failed assertion as a programming error.
///
/// # Example
///
/// ```
/// fn half(n: u32) {
///     oxitype::return_if_fail!(n % 2 == 0);
///     println!("{}", n / 2);
/// }
///
/// oxitype_log::capture(|| half(3));
/// ```
#[macro_export]
macro_rules! return_if_fail {
    ($cond:expr) => {
        if !$cond {
            $crate::check::report(
                module_path!(),
                format_args!("assertion '{}' failed", stringify!($cond)),
            );
            return;
        }
    };
}

/// Returns `val` from the current function if `cond` is false, reporting
/// the failed assertion as a programming error.
///
/// # Example
///
/// ```
/// fn checked_len(s: Option<&str>) -> usize {
///     oxitype::return_val_if_fail!(s.is_some(), 0);
///     s.map_or(0, str::len)
/// }
///
/// let (len, records) = oxitype_log::capture(|| checked_len(None));
/// assert_eq!(len, 0);
/// assert_eq!(records.len(), 1);
/// ```
#[macro_export]
macro_rules! return_val_if_fail {
    ($cond:expr, $val:expr) => {
        if !$cond {
            $crate::check::report(
                module_path!(),
                format_args!("assertion '{}' failed", stringify!($cond)),
            );
            return $val;
        }
    };
}
