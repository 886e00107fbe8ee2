//! Database and namespace name validation

use crate::{Error, Result};

/// Longest database name the server accepts
const MAX_DATABASE_NAME_LEN: usize = 63;

/// Characters a database name may not contain
const INVALID_DATABASE_CHARS: &[char] = &['/', '\\', '.', ' ', '"', '$', '*', '<', '>', ':', '|', '?', '\0'];

/// A validated `database.collection` namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    /// Parse and validate `database.collection`
    ///
    /// The collection part may itself contain dots (`db.system.indexes`).
    pub fn parse(ns: &str) -> Result<Self> {
        let (database, collection) = ns
            .split_once('.')
            .ok_or_else(|| Error::InvalidNamespace(ns.to_string()))?;
        if !is_valid_database_name(database) || !is_valid_collection_name(collection) {
            return Err(Error::InvalidNamespace(ns.to_string()));
        }
        Ok(Self {
            database: database.to_string(),
            collection: collection.to_string(),
        })
    }

    /// Database part
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Collection part
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

impl std::str::FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Check a database name
pub fn is_valid_database_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_DATABASE_NAME_LEN
        && !name.contains(INVALID_DATABASE_CHARS)
}

/// Check a collection name
pub fn is_valid_collection_name(name: &str) -> bool {
    if name.is_empty() || name.contains('\0') || name.starts_with('.') || name.ends_with('.') {
        return false;
    }
    // `$` only appears in the server's own oplog collections
    !name.contains('$') || name.starts_with("oplog.$")
}

/// Validate a database name, returning it unchanged
pub fn validate_database_name(name: &str) -> Result<&str> {
    if is_valid_database_name(name) {
        Ok(name)
    } else {
        Err(Error::InvalidNamespace(name.to_string()))
    }
}
