//! Domain newtype
//!
//! Domains are compared case-insensitively, so they are stored lowercased.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// A lowercased domain name
///
/// ```
/// use mailchat_common::Domain;
///
/// let domain = Domain::new("Example.COM");
/// assert_eq!(domain.as_str(), "example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Domain(Arc<str>);

impl Domain {
    #[must_use]
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(s.as_ref().to_ascii_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this domain is `parent` or one of its subdomains
    ///
    /// ```
    /// use mailchat_common::Domain;
    ///
    /// let parent = Domain::new("example.com");
    /// assert!(Domain::new("mx.example.com").is_within(&parent));
    /// assert!(!Domain::new("badexample.com").is_within(&parent));
    /// ```
    #[must_use]
    pub fn is_within(&self, parent: &Self) -> bool {
        self.0
            .strip_suffix(parent.as_str())
            .is_some_and(|prefix| prefix.is_empty() || prefix.ends_with('.'))
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Domain {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<Domain> for String {
    fn from(domain: Domain) -> Self {
        domain.0.to_string()
    }
}
