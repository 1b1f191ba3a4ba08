pub mod field;

use std::{fmt, str::FromStr};

use serde::Deserialize;
use thiserror::Error;

pub use field::{BoundField, FieldError, FieldWidth, RegisterField};

/// `window.field` reference used by role bindings and lifecycle lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct FieldPath {
    pub window: String,
    pub field: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("field path '{0}' must look like 'window.field'")]
pub struct FieldPathError(pub String);

impl FromStr for FieldPath {
    type Err = FieldPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((window, field)) if !window.is_empty() && !field.is_empty() && !field.contains('.') => {
                Ok(Self {
                    window: window.to_string(),
                    field: field.to_string(),
                })
            }
            _ => Err(FieldPathError(s.to_string())),
        }
    }
}

impl TryFrom<String> for FieldPath {
    type Error = FieldPathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.window, self.field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_window_and_field() {
        let path: FieldPath = "gpio1.led3".parse().unwrap();
        assert_eq!(path.window, "gpio1");
        assert_eq!(path.field, "led3");
        assert_eq!(path.to_string(), "gpio1.led3");
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["gpio1", ".led", "gpio1.", "a.b.c"] {
            assert!(bad.parse::<FieldPath>().is_err(), "'{bad}' should not parse");
        }
    }
}
