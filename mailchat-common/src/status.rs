use core::fmt::{self, Display, Formatter};
use std::borrow::Cow;

use serde::{Deserialize, Serialize};

#[repr(u16)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum Status {
    Ok = 250,
    Unavailable = 421,
    MailboxUnavailable = 450,
    ActionUnavailable = 451,
    InsufficientStorage = 452,
    Error = 550,
    UserNotLocal = 551,
    ExceededStorage = 552,
    MailboxNameNotAllowed = 553,
    TransactionFailed = 554,
    Unknown(u16),
}

impl Status {
    /// Checks if the status is a permanent rejection
    pub fn is_permanent(self) -> bool {
        u16::from(self) >= 500
    }

    /// Checks if the status is a temporary rejection
    pub fn is_temporary(self) -> bool {
        (400..500).contains(&u16::from(self))
    }
}

impl From<u16> for Status {
    fn from(value: u16) -> Self {
        match value {
            250 => Self::Ok,
            421 => Self::Unavailable,
            450 => Self::MailboxUnavailable,
            451 => Self::ActionUnavailable,
            452 => Self::InsufficientStorage,
            550 => Self::Error,
            551 => Self::UserNotLocal,
            552 => Self::ExceededStorage,
            553 => Self::MailboxNameNotAllowed,
            554 => Self::TransactionFailed,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u16 {
    fn from(value: Status) -> Self {
        match value {
            Status::Ok => 250,
            Status::Unavailable => 421,
            Status::MailboxUnavailable => 450,
            Status::ActionUnavailable => 451,
            Status::InsufficientStorage => 452,
            Status::Error => 550,
            Status::UserNotLocal => 551,
            Status::ExceededStorage => 552,
            Status::MailboxNameNotAllowed => 553,
            Status::TransactionFailed => 554,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u16::from(*self))
    }
}

/// Enhanced status code (RFC 3463), e.g. `5.1.1`
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct EnhancedCode(pub u8, pub u16, pub u16);

impl EnhancedCode {
    /// Parse `class.subject.detail`
    ///
    /// ```
    /// use mailchat_common::EnhancedCode;
    ///
    /// assert_eq!(EnhancedCode::parse("5.7.1"), Some(EnhancedCode(5, 7, 1)));
    /// assert_eq!(EnhancedCode::parse("3.0.0"), None);
    /// ```
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, '.');
        let class = parts.next()?.parse().ok()?;
        let subject = parts.next()?.parse().ok()?;
        let detail = parts.next()?.parse().ok()?;

        matches!(class, 2 | 4 | 5).then_some(Self(class, subject, detail))
    }
}

impl Display for EnhancedCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// A status line handed back to whoever submitted the message
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Reply {
    pub status: Status,
    pub enhanced: EnhancedCode,
    pub message: Cow<'static, str>,
}

impl Reply {
    pub fn new(
        status: Status,
        enhanced: EnhancedCode,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            status,
            enhanced,
            message: message.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.status.is_permanent()
    }

    pub fn is_temporary(&self) -> bool {
        self.status.is_temporary()
    }

    /// `250 2.0.0 OK: queued`
    pub const fn queued() -> Self {
        Self {
            status: Status::Ok,
            enhanced: EnhancedCode(2, 0, 0),
            message: Cow::Borrowed("OK: queued"),
        }
    }

    /// `550 5.1.1 User doesn't exist`
    pub const fn no_such_user() -> Self {
        Self {
            status: Status::Error,
            enhanced: EnhancedCode(5, 1, 1),
            message: Cow::Borrowed("User doesn't exist"),
        }
    }

    /// `554 5.7.0 Message rejected due to a local policy`
    pub const fn policy_reject() -> Self {
        Self {
            status: Status::TransactionFailed,
            enhanced: EnhancedCode(5, 7, 0),
            message: Cow::Borrowed("Message rejected due to a local policy"),
        }
    }

    /// `451 4.0.0 <message>`, used when a local component failed
    pub fn local_error(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Status::ActionUnavailable, EnhancedCode(4, 0, 0), message)
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.status, self.enhanced, self.message)
    }
}
