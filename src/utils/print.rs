//! Logging initializer and replica-tagged printing macros.

/// Initializes the global logger with the `env_logger` backend. Safe to call
/// more than once; later calls are no-ops.
pub fn logger_init() {
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .try_init();
}

/// Log TRACE message tagged by the acting replica's ID.
macro_rules! pf_trace {
    ($me:expr; $($fmt_args:tt)*) => {
        ::log::trace!("({}) {}", $me, format_args!($($fmt_args)*))
    };
}

/// Log DEBUG message tagged by the acting replica's ID.
macro_rules! pf_debug {
    ($me:expr; $($fmt_args:tt)*) => {
        ::log::debug!("({}) {}", $me, format_args!($($fmt_args)*))
    };
}

/// Log INFO message tagged by the acting replica's ID.
macro_rules! pf_info {
    ($me:expr; $($fmt_args:tt)*) => {
        ::log::info!("({}) {}", $me, format_args!($($fmt_args)*))
    };
}

/// Log WARN message tagged by the acting replica's ID.
macro_rules! pf_warn {
    ($me:expr; $($fmt_args:tt)*) => {
        ::log::warn!("({}) {}", $me, format_args!($($fmt_args)*))
    };
}

/// Log ERROR message tagged by the acting replica's ID.
macro_rules! pf_error {
    ($me:expr; $($fmt_args:tt)*) => {
        ::log::error!("({}) {}", $me, format_args!($($fmt_args)*))
    };
}

/// Log an error message, then make a `ConsortError` out of it wrapped in
/// `Err()`, usable as a tail expression in fallible functions.
macro_rules! logged_err {
    ($me:expr; $($fmt_args:tt)*) => {{
        $crate::utils::pf_error!($me; $($fmt_args)*);
        Err($crate::utils::ConsortError::msg(format!($($fmt_args)*)))
    }};
}

pub(crate) use {
    logged_err, pf_debug, pf_error, pf_info, pf_trace, pf_warn,
};
