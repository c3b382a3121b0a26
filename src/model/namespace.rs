use std::fmt::Display;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid resource hostname: {0}")]
pub struct BadResourceName(pub String);

/// Hostname of a `resource://` mount point.
///
/// Only lowercase ASCII letters, digits, `-` and `_` are accepted; anything
/// else is rejected before the name is used to touch the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ResourceNamespace(String);

impl ResourceNamespace {
    pub fn new(name: impl Into<String>) -> Result<Self, BadResourceName> {
        let name = name.into();
        validate_resource_hostname(&name)?;
        Ok(ResourceNamespace(name))
    }

    /// Composes `<prefix><package>-<section dir>` and validates the result.
    pub fn compose(prefix: &str, package: &str, dir_name: &str) -> Result<Self, BadResourceName> {
        Self::new(format!("{prefix}{package}-{dir_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn url(&self) -> String {
        format!("resource://{}/", self.0)
    }
}

impl Display for ResourceNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The empty string is accepted so that an empty prefix is valid.
pub fn validate_prefix(prefix: &str) -> Result<(), BadResourceName> {
    if prefix.is_empty() {
        Ok(())
    } else {
        validate_resource_hostname(prefix)
    }
}

pub fn validate_resource_hostname(name: &str) -> Result<(), BadResourceName> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_'));
    if valid {
        Ok(())
    } else {
        Err(BadResourceName(name.to_string()))
    }
}
