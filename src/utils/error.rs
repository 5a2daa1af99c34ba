//! Customized error type shared across modules.

use std::error;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Customized string-message error type, used everywhere.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ConsortError(pub String);

impl ConsortError {
    /// Creates an error out of anything that prints.
    pub fn msg(m: impl ToString) -> Self {
        ConsortError(m.to_string())
    }
}

impl fmt::Display for ConsortError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl error::Error for ConsortError {}

// implement `From` for common error types mappable to `ConsortError`
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for ConsortError {
            fn from(e: $error) -> Self {
                // just store the printed string of error
                ConsortError(e.to_string())
            }
        }
    };
}

impl_from_error!(std::io::Error);
impl_from_error!(std::cell::BorrowError);
impl_from_error!(std::cell::BorrowMutError);
impl_from_error!(toml::de::Error);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = ConsortError::msg("some error received");
        assert_eq!(format!("{}", e), String::from("some error received"));
    }

    #[test]
    fn from_foreign() {
        let ioe =
            std::io::Error::new(std::io::ErrorKind::NotFound, "file gone");
        let e: ConsortError = ioe.into();
        assert!(e.0.contains("file gone"));
    }
}
