use crate::errors::{Result, SieveError};

/// Serializes a value to pretty JSON with canonical error handling.
pub fn to_pretty_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|err| SieveError::SerializationError(err.to_string()))
}

/// Deserializes a JSON string into the provided type with shared error semantics.
pub fn from_json_str<T: serde::de::DeserializeOwned>(input: &str) -> Result<T> {
    serde_json::from_str(input).map_err(|err| SieveError::DeserializationError(err.to_string()))
}

/// Reads and deserializes a JSON file.
pub fn from_json_file<T: serde::de::DeserializeOwned>(
    path: impl AsRef<std::path::Path>,
) -> Result<T> {
    let raw = std::fs::read_to_string(path)?;
    from_json_str(&raw)
}
