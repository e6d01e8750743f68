//! Error types for module construction and capability calls.

use std::io;

use mailchat_common::{Location, Reply};
use thiserror::Error;

/// Errors returned by capability calls (delivery, checks, storage, ...).
#[derive(Debug, Error)]
pub enum ModuleError {
    /// A deliberate refusal with a status line for the submitter.
    #[error("{0}")]
    Rejected(Reply),

    /// Failure that may succeed if retried later.
    #[error("Temporary failure: {0}")]
    Temporary(String),

    /// Failure that will not succeed if retried.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid credentials")]
    UnknownCredentials,

    #[error("Operation not supported")]
    Unsupported,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ModuleError {
    /// Returns `true` if the failure is worth retrying.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        match self {
            Self::Rejected(reply) => reply.is_temporary(),
            Self::Temporary(_) | Self::Io(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if retrying cannot help.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        !self.is_temporary()
    }

    /// The status line to report for this failure.
    #[must_use]
    pub fn reply(&self) -> Reply {
        use mailchat_common::{EnhancedCode, Status};

        match self {
            Self::Rejected(reply) => reply.clone(),
            Self::NotFound(_) => Reply::no_such_user(),
            Self::Permanent(message) => Reply::new(
                Status::TransactionFailed,
                EnhancedCode(5, 0, 0),
                message.clone(),
            ),
            Self::UnknownCredentials => Reply::new(
                Status::Unknown(535),
                EnhancedCode(5, 7, 8),
                "Invalid credentials",
            ),
            Self::Unsupported | Self::AlreadyExists(_) => {
                Reply::new(Status::TransactionFailed, EnhancedCode(5, 5, 0), self.to_string())
            }
            Self::Temporary(_) | Self::Io(_) => Reply::local_error(self.to_string()),
        }
    }
}

/// Errors that abort building the module graph.
///
/// Every variant that can be traced back to a directive carries its location.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{location}: unknown module: {name}")]
    UnknownModule { location: Location, name: String },

    #[error("{location}: config block named {name} already exists")]
    DuplicateName { location: Location, name: String },

    #[error("{location}: unknown reference: {name}")]
    UnknownReference { location: Location, name: String },

    #[error("{location}: cyclic reference to {name}")]
    CyclicReference { location: Location, name: String },

    #[error("{location}: unused configuration block: {name}")]
    Unused { location: Location, name: String },

    #[error("{location}: missing required directive: {name}")]
    MissingDirective { location: Location, name: String },

    #[error("{location}: unknown directive: {name}")]
    UnknownDirective { location: Location, name: String },

    #[error("{location}: {name} is not a {capability}")]
    Capability {
        location: Location,
        name: String,
        capability: &'static str,
    },

    #[error("{location}: {message}")]
    Invalid { location: Location, message: String },

    #[error("{location}: {name}: {source}")]
    Module {
        location: Location,
        name: String,
        #[source]
        source: ModuleError,
    },

    #[error("at least one endpoint should be configured")]
    NoEndpoints,
}

impl ConfigError {
    pub fn invalid(location: Location, message: impl Into<String>) -> Self {
        Self::Invalid {
            location,
            message: message.into(),
        }
    }

    /// Where the offending directive is, if there is one.
    #[must_use]
    pub const fn location(&self) -> Option<&Location> {
        match self {
            Self::UnknownModule { location, .. }
            | Self::DuplicateName { location, .. }
            | Self::UnknownReference { location, .. }
            | Self::CyclicReference { location, .. }
            | Self::Unused { location, .. }
            | Self::MissingDirective { location, .. }
            | Self::UnknownDirective { location, .. }
            | Self::Capability { location, .. }
            | Self::Invalid { location, .. }
            | Self::Module { location, .. } => Some(location),
            Self::NoEndpoints => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use mailchat_common::{EnhancedCode, Status};

    use super::*;

    #[test]
    fn module_error_classification() {
        assert!(ModuleError::Temporary("busy".to_string()).is_temporary());
        assert!(ModuleError::Io(io::Error::from(io::ErrorKind::TimedOut)).is_temporary());
        assert!(ModuleError::Permanent("gone".to_string()).is_permanent());
        assert!(ModuleError::NotFound("a@example.com".to_string()).is_permanent());

        let greylisted = Reply::new(Status::MailboxUnavailable, EnhancedCode(4, 7, 1), "Try later");
        assert!(ModuleError::Rejected(greylisted).is_temporary());
        assert!(ModuleError::Rejected(Reply::policy_reject()).is_permanent());
    }

    #[test]
    fn module_error_reply() {
        assert_eq!(
            ModuleError::NotFound("x".to_string()).reply(),
            Reply::no_such_user()
        );
        assert_eq!(
            ModuleError::Temporary("disk full".to_string()).reply().to_string(),
            "451 4.0.0 Temporary failure: disk full"
        );
    }

    #[test]
    fn config_error_display_has_location() {
        let err = ConfigError::DuplicateName {
            location: Location::new("mailchat.ron", 7),
            name: "local_mailboxes".to_string(),
        };

        assert_eq!(
            err.to_string(),
            "mailchat.ron:7: config block named local_mailboxes already exists"
        );
        assert_eq!(err.location().map(|l| l.line), Some(7));
        assert!(ConfigError::NoEndpoints.location().is_none());
    }
}
