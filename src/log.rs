//! Logging macros that work on the device and on the host.
//!
//! - With the `defmt` feature: forwards to `defmt` (timestamps come from
//!   `embassy-time`'s uptime).
//! - Host unit tests: prints to stdout.
//! - Otherwise: no-op.
//!
//! Arguments must implement both `Display` and `defmt::Format`, so log
//! strings, integers, and bools. Log addresses octet by octet.

macro_rules! log_at {
    ($level:ident, $tag:literal, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::$level!($fmt $(, $arg)*);

        #[cfg(all(not(feature = "defmt"), test))]
        ::std::println!(concat!($tag, " ", $fmt) $(, $arg)*);

        #[cfg(all(not(feature = "defmt"), not(test)))]
        {
            let _ = ($(&$arg,)*);
        }
    }};
}

macro_rules! info {
    ($($arg:tt)*) => { $crate::log::log_at!(info, "[INFO] ", $($arg)*) };
}

macro_rules! warn_ {
    ($($arg:tt)*) => { $crate::log::log_at!(warn, "[WARN] ", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { $crate::log::log_at!(error, "[ERROR]", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { $crate::log::log_at!(debug, "[DEBUG]", $($arg)*) };
}

pub(crate) use {debug, error, info, log_at, warn_ as warn};
