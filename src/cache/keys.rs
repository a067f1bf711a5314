//! Query normalization and store key layout

use sha2::{Digest, Sha256};

/// Trim, collapse internal whitespace and optionally lowercase a query
pub fn normalize_query(query: &str, lowercase: bool) -> String {
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if lowercase {
        collapsed.to_lowercase()
    } else {
        collapsed
    }
}

/// Hex SHA-256 of an already-normalized query
pub fn query_hash(normalized: &str) -> String {
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Deterministic entry id for a query hash and model
pub fn entry_id(query_hash: &str, model: &str) -> String {
    format!("{}:{}", query_hash, model)
}

/// Key layout under a namespace prefix.
///
/// Entries live at `{prefix}entry:{query_hash}:{model}`, so every model's
/// answer to one query shares the `{prefix}entry:{query_hash}:` prefix.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Prefix shared by every entry key
    pub fn entries(&self) -> String {
        format!("{}entry:", self.prefix)
    }

    /// Prefix shared by every model's entry for one query
    pub fn query(&self, query_hash: &str) -> String {
        format!("{}entry:{}:", self.prefix, query_hash)
    }

    pub fn entry(&self, query_hash: &str, model: &str) -> String {
        format!("{}entry:{}:{}", self.prefix, query_hash, model)
    }

    /// Store key for an entry id
    pub fn for_id(&self, id: &str) -> String {
        format!("{}entry:{}", self.prefix, id)
    }

    /// Entry id of a store key, if it is an entry key in this namespace
    pub fn id_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix("entry:"))
    }

    /// Model tag of an entry key
    pub fn model_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        self.id_of(key)
            .and_then(|id| id.split_once(':'))
            .map(|(_, model)| model)
    }
}
