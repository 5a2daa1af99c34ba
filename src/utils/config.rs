//! Config string parsing helper.

use crate::utils::ConsortError;

use serde::de::DeserializeOwned;

/// Parses an optional TOML fragment into a config struct, filling every
/// field not mentioned in the string with its default value. Config structs
/// are expected to carry `#[serde(default)]`.
pub fn parsed_config<T>(config_str: Option<&str>) -> Result<T, ConsortError>
where
    T: Default + DeserializeOwned,
{
    match config_str {
        None => Ok(T::default()),
        Some(s) => Ok(toml::from_str(s)?),
    }
}
