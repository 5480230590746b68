use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of indexes the app contract assigns to every oracle.
pub const INDEXES_PER_ORACLE: usize = 3;

/// A ledger account, kept as a lowercase `0x`-prefixed hex address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountHandle(String);

impl AccountHandle {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for a `0x` prefix followed by exactly 40 hex digits.
    pub fn is_address(&self) -> bool {
        self.0
            .strip_prefix("0x")
            .map(|digits| digits.len() == 40 && digits.chars().all(|c| c.is_ascii_hexdigit()))
            .unwrap_or(false)
    }
}

impl fmt::Display for AccountHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountHandle {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Opaque index handed out by the ledger. Only ever compared for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index(pub u8);

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed-size set of indexes assigned to one oracle at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexSet([Index; INDEXES_PER_ORACLE]);

impl IndexSet {
    pub fn new(indexes: [u8; INDEXES_PER_ORACLE]) -> Self {
        Self(indexes.map(Index))
    }

    pub fn contains(&self, index: Index) -> bool {
        self.0.contains(&index)
    }

    pub fn as_slice(&self) -> &[Index] {
        &self.0
    }
}

impl From<[u8; INDEXES_PER_ORACLE]> for IndexSet {
    fn from(indexes: [u8; INDEXES_PER_ORACLE]) -> Self {
        Self::new(indexes)
    }
}

impl fmt::Display for IndexSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "[{a}, {b}, {c}]")
    }
}

/// How an identity came to be in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    /// Registered by this process; the registration fee was paid.
    Registered,
    /// Already registered on the ledger; indexes were adopted as-is.
    Reconciled,
}

/// One oracle participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub account: AccountHandle,
    pub indexes: IndexSet,
    pub status: IdentityStatus,
}

impl Identity {
    pub fn new(account: AccountHandle, indexes: IndexSet, status: IdentityStatus) -> Self {
        Self {
            account,
            indexes,
            status,
        }
    }

    /// Whether this oracle was selected for a request carrying `index`.
    pub fn matches(&self, index: Index) -> bool {
        self.indexes.contains(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_handles_are_normalised() {
        let account = AccountHandle::new(" 0xABCDEF0123456789abcdef0123456789ABCDEF01 ");
        assert_eq!(account.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
        assert!(account.is_address());
        assert!(!AccountHandle::new("0x1234").is_address());
        assert!(!AccountHandle::new("not-an-address").is_address());
    }

    #[test]
    fn identity_matches_only_its_indexes() {
        let identity = Identity::new(
            AccountHandle::new("0x0000000000000000000000000000000000000001"),
            IndexSet::new([1, 2, 3]),
            IdentityStatus::Registered,
        );

        assert!(identity.matches(Index(2)));
        assert!(!identity.matches(Index(4)));
        assert_eq!(identity.indexes.to_string(), "[1, 2, 3]");
    }
}
