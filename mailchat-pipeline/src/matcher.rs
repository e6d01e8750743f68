//! Address patterns used by `source` and `destination` rules.

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use mailchat_common::{Address, Domain};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,

    #[error("invalid address pattern {0}")]
    InvalidAddress(String),

    #[error("invalid wildcard pattern {0}: expected *.domain")]
    InvalidWildcard(String),

    #[error("macro patterns are not supported: {0}")]
    Macro(String),
}

/// How a rule selects addresses.
///
/// Patterns are matched case-insensitively; the null address matches no
/// pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// A single mailbox, e.g. `postmaster@example.com`
    Address(String),
    /// Every mailbox at a domain, e.g. `example.com`
    Domain(Domain),
    /// A domain and all of its subdomains, e.g. `*.example.com`
    Wildcard(Domain),
}

impl Pattern {
    #[must_use]
    pub fn matches(&self, address: &Address) -> bool {
        if address.is_null() {
            return false;
        }

        match self {
            Self::Address(pattern) => address.normalized() == *pattern,
            Self::Domain(pattern) => address.domain() == Some(pattern),
            Self::Wildcard(pattern) => address
                .domain()
                .is_some_and(|domain| domain.is_within(pattern)),
        }
    }
}

impl FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pattern = s.trim();

        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        if pattern.starts_with("$(") {
            return Err(PatternError::Macro(pattern.to_string()));
        }

        if let Some(domain) = pattern.strip_prefix("*.") {
            if domain.is_empty() || domain.contains(['*', '@']) {
                return Err(PatternError::InvalidWildcard(pattern.to_string()));
            }
            return Ok(Self::Wildcard(Domain::new(domain)));
        }

        if pattern.contains('*') {
            return Err(PatternError::InvalidWildcard(pattern.to_string()));
        }

        if pattern.contains('@') {
            let address = Address::parse(pattern)
                .map_err(|_| PatternError::InvalidAddress(pattern.to_string()))?;
            if address.is_null() || address.domain().is_none() {
                return Err(PatternError::InvalidAddress(pattern.to_string()));
            }
            return Ok(Self::Address(address.normalized()));
        }

        Ok(Self::Domain(Domain::new(pattern)))
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => f.write_str(address),
            Self::Domain(domain) => write!(f, "{domain}"),
            Self::Wildcard(domain) => write!(f, "*.{domain}"),
        }
    }
}

/// Whether any pattern in `patterns` matches `address`
pub fn matches_any(patterns: &[Pattern], address: &Address) -> bool {
    patterns.iter().any(|pattern| pattern.matches(address))
}
