//! Validated SQL identifiers (table and column names).
//!
//! Administrative operations address arbitrary tables by name, so every name
//! that reaches a query builder must first become an [`Identifier`]. Values
//! are always bound as parameters; identifiers can't be, which is why they
//! are restricted to a conservative alphabet and quoted on use.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Maximum identifier length accepted by Postgres without truncation.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A table or column name matching `[A-Za-z_][A-Za-z0-9_]{0,62}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        if raw.is_empty() {
            return Err(DomainError::validation("identifier cannot be empty"));
        }
        if raw.len() > MAX_IDENTIFIER_LEN {
            return Err(DomainError::validation(format!(
                "identifier '{raw}' exceeds {MAX_IDENTIFIER_LEN} characters"
            )));
        }

        let mut chars = raw.chars();
        let first = chars.next().unwrap_or('0');
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(DomainError::validation(format!(
                "identifier '{raw}' must start with a letter or underscore"
            )));
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DomainError::validation(format!(
                "identifier '{raw}' contains disallowed characters"
            )));
        }

        Ok(Self(raw.to_string()))
    }

    /// The conventional primary-key column, `id`.
    pub fn primary_key() -> Self {
        Self("id".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for direct interpolation into SQL.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl core::fmt::Display for Identifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identifier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl PartialEq<str> for Identifier {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Identifier {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
