//! Helper utilities, functions, and macros.

mod config;
mod countdown;
mod error;
mod print;

pub use config::parsed_config;
pub use error::ConsortError;
pub use print::logger_init;

pub(crate) use countdown::Countdown;
pub(crate) use print::{
    logged_err, pf_debug, pf_error, pf_info, pf_trace, pf_warn,
};
