use std::{
    fmt::{self, Display},
    str::FromStr,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{Domain, error::AddressError};

/// An envelope address
///
/// The null address (`<>`) is the sender of bounce messages. Addresses
/// without a domain (such as `postmaster`) are accepted as recipients.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    local: Arc<str>,
    domain: Option<Domain>,
}

impl Address {
    #[must_use]
    pub fn null() -> Self {
        Self {
            local: Arc::from(""),
            domain: None,
        }
    }

    /// Parse an address, with or without surrounding angle brackets
    ///
    /// # Errors
    ///
    /// Returns an [`AddressError`] if the address is malformed.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        let inner = trimmed
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .unwrap_or(trimmed);

        if inner.is_empty() {
            return if trimmed.is_empty() {
                Err(AddressError::Empty)
            } else {
                Ok(Self::null())
            };
        }

        if inner
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>')
        {
            return Err(AddressError::InvalidCharacter(inner.to_string()));
        }

        match inner.rsplit_once('@') {
            Some(("", _)) => Err(AddressError::MissingLocalPart(inner.to_string())),
            Some((_, "")) => Err(AddressError::MissingDomain(inner.to_string())),
            Some((local, domain)) => Ok(Self {
                local: Arc::from(local),
                domain: Some(Domain::new(domain)),
            }),
            None => Ok(Self {
                local: Arc::from(inner),
                domain: None,
            }),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.local.is_empty() && self.domain.is_none()
    }

    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local
    }

    #[must_use]
    pub const fn domain(&self) -> Option<&Domain> {
        self.domain.as_ref()
    }

    /// Lowercased form used for lookups and matching
    #[must_use]
    pub fn normalized(&self) -> String {
        self.to_string().to_lowercase()
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "{}@{domain}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Ok(Self::null())
        } else {
            Self::parse(&value)
        }
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}
