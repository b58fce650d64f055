//! Logging macros used throughout the client.
//!
//! Every module logs through these instead of calling `tracing` directly, so
//! the backend can be swapped in one place. The macros expand at the call
//! site, which keeps the caller's module path as the `tracing` target
//! (filterable with `RUST_LOG=automed_client::push=debug`).

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        ::tracing::info!($($arg)*)
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        ::tracing::error!($($arg)*)
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        ::tracing::warn!($($arg)*)
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        ::tracing::debug!($($arg)*)
    };
}
