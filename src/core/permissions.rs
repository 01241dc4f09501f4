//! Job permission requirements and their merge.
//!
//! Steps declare the access they need per scope (`id-token`, `contents`,
//! `packages`, ...). A job requests the per-scope maximum over its steps.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ID_TOKEN: &str = "id-token";
pub const CONTENTS: &str = "contents";
pub const PACKAGES: &str = "packages";

/// Access level for a permission scope, ordered `none < read < write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    None,
    Read,
    Write,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
        }
    }

    /// Parse a level for `scope`, rejecting anything outside the known set.
    pub fn parse(scope: &str, value: &str) -> Result<Self> {
        match value.trim() {
            "none" => Ok(AccessLevel::None),
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::Write),
            other => Err(Error::permission_invalid_level(scope, other)),
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AccessLevel::parse("permission", s)
    }
}

/// Raw permission declarations as written in configuration.
pub type RawPermissions = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(BTreeMap<String, AccessLevel>);

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, scope: &str, level: AccessLevel) -> Self {
        self.request(scope, level);
        self
    }

    /// Request `level` on `scope`; an existing higher level is kept.
    pub fn request(&mut self, scope: &str, level: AccessLevel) {
        let entry = self.0.entry(scope.to_string()).or_insert(level);
        if level > *entry {
            *entry = level;
        }
    }

    pub fn from_raw(raw: &RawPermissions) -> Result<Self> {
        let mut permissions = Permissions::new();
        for (scope, value) in raw {
            permissions.request(scope, AccessLevel::parse(scope, value)?);
        }
        Ok(permissions)
    }

    pub fn level(&self, scope: &str) -> AccessLevel {
        self.0.get(scope).copied().unwrap_or(AccessLevel::None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, AccessLevel)> {
        self.0.iter().map(|(scope, level)| (scope.as_str(), *level))
    }

    pub fn extend(&mut self, other: &Permissions) {
        for (scope, level) in other.iter() {
            self.request(scope, level);
        }
    }
}

/// Merge permission sets into the per-scope maximum.
pub fn merge<'a, I>(inputs: I) -> Permissions
where
    I: IntoIterator<Item = &'a Permissions>,
{
    let mut merged = Permissions::new();
    for permissions in inputs {
        merged.extend(permissions);
    }
    merged
}

/// Merge raw declarations, failing on the first unrecognized level.
pub fn merge_raw(inputs: &[RawPermissions]) -> Result<Permissions> {
    let parsed = inputs
        .iter()
        .map(Permissions::from_raw)
        .collect::<Result<Vec<_>>>()?;
    Ok(merge(&parsed))
}
