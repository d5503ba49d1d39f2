//! ---
//! tsf_section: "01-core-functionality"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Shared primitives and utilities for the core runtime."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Connection-string settings.
//!
//! Adapters are configured through an opaque `key=value;key=value` string. Values may be
//! wrapped in start/end delimiters (`{` and `}` by default) so they can contain the parameter
//! delimiter themselves, e.g. `inputMeasurementKeys={FILTER ActiveMeasurements WHERE ID LIKE 'PPA:%'}`.
//! Wrapped values may nest.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Errors raised while parsing a connection string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// A value opened with the start delimiter was never closed.
    #[error("unbalanced value delimiters in connection string near `{0}`")]
    Unbalanced(String),
    /// A parameter had no key/value delimiter.
    #[error("connection string parameter `{0}` is missing a key/value delimiter")]
    MissingDelimiter(String),
    /// A parameter key was empty.
    #[error("connection string contains an empty key")]
    EmptyKey,
}

/// Delimiters used to tokenise a connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStringFormat {
    pub parameter_delimiter: char,
    pub key_value_delimiter: char,
    pub start_value_delimiter: char,
    pub end_value_delimiter: char,
}

impl Default for ConnectionStringFormat {
    fn default() -> Self {
        Self {
            parameter_delimiter: ';',
            key_value_delimiter: '=',
            start_value_delimiter: '{',
            end_value_delimiter: '}',
        }
    }
}

/// Parsed connection-string settings with case-insensitive keys.
///
/// Keys are normalised to lower case for lookup while the original spelling is preserved for
/// round-tripping through [`Settings::to_connection_string`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    entries: IndexMap<String, (String, String)>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string using the default delimiters.
    pub fn parse(connection_string: &str) -> Result<Self, SettingsError> {
        Self::parse_with(connection_string, ConnectionStringFormat::default())
    }

    /// Parse a connection string using custom delimiters.
    pub fn parse_with(
        connection_string: &str,
        format: ConnectionStringFormat,
    ) -> Result<Self, SettingsError> {
        let mut settings = Settings::new();
        for parameter in split_parameters(connection_string, format)? {
            let parameter = parameter.trim();
            if parameter.is_empty() {
                continue;
            }
            let Some((key, value)) = parameter.split_once(format.key_value_delimiter) else {
                return Err(SettingsError::MissingDelimiter(parameter.to_owned()));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(SettingsError::EmptyKey);
            }
            settings.insert(key, unwrap_value(value.trim(), format));
        }
        Ok(settings)
    }

    /// Insert or replace a setting.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.entries
            .insert(key.to_lowercase(), (key, value.into()));
    }

    /// Look up a setting by key, ignoring case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries
            .shift_remove(&key.to_lowercase())
            .map(|(_, value)| value)
    }

    /// Parse a setting into a typed value. `Ok(None)` when the key is absent.
    pub fn parse_value<T>(&self, key: &str) -> Result<Option<T>, T::Err>
    where
        T: FromStr,
    {
        self.get(key).map(str::parse::<T>).transpose()
    }

    /// Interpret a setting as a boolean using the usual truthy spellings.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(parse_bool)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Serialise back into a connection string, wrapping values that need it.
    pub fn to_connection_string(&self) -> String {
        let format = ConnectionStringFormat::default();
        self.iter()
            .map(|(key, value)| {
                let needs_wrap = value.contains(format.parameter_delimiter)
                    || value.contains(format.key_value_delimiter)
                    || value.contains(format.start_value_delimiter);
                if needs_wrap {
                    format!(
                        "{}{}{}{}{}",
                        key,
                        format.key_value_delimiter,
                        format.start_value_delimiter,
                        value,
                        format.end_value_delimiter
                    )
                } else {
                    format!("{}{}{}", key, format.key_value_delimiter, value)
                }
            })
            .collect::<Vec<_>>()
            .join(&format.parameter_delimiter.to_string())
    }
}

impl FromStr for Settings {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Settings::parse(s)
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_connection_string())
    }
}

/// Interpret common boolean spellings (`true`, `yes`, `on`, `1`).
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "1" | "y" | "t"
    )
}

fn split_parameters(
    input: &str,
    format: ConnectionStringFormat,
) -> Result<Vec<String>, SettingsError> {
    let mut parameters = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for ch in input.chars() {
        if ch == format.start_value_delimiter {
            depth += 1;
        } else if ch == format.end_value_delimiter {
            if depth == 0 {
                return Err(SettingsError::Unbalanced(current));
            }
            depth -= 1;
        }

        if ch == format.parameter_delimiter && depth == 0 {
            parameters.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }

    if depth != 0 {
        return Err(SettingsError::Unbalanced(current));
    }
    parameters.push(current);
    Ok(parameters)
}

fn unwrap_value(value: &str, format: ConnectionStringFormat) -> String {
    let inner = value
        .strip_prefix(format.start_value_delimiter)
        .and_then(|rest| rest.strip_suffix(format.end_value_delimiter));
    match inner {
        Some(inner) => inner.trim().to_owned(),
        None => value.to_owned(),
    }
}
