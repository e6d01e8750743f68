use std::{
    fmt::{self, Display},
    str::FromStr,
    sync::Arc,
    time::SystemTime,
};

use mailparse::MailHeaderMap;
use serde::{Deserialize, Serialize};

use crate::Address;

/// Identifier assigned to a message when it is accepted
///
/// ULIDs sort by creation time, which keeps queue listings in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(ulid::Ulid);

impl MessageId {
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self)
    }
}

/// A message in transit: who sent it, who it is for, and the raw message
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: MessageId,
    pub sender: Address,
    pub recipients: Vec<Address>,
    pub body: Arc<[u8]>,
    pub received_at: SystemTime,
}

impl Envelope {
    pub fn new(sender: Address, recipients: Vec<Address>, body: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id: MessageId::generate(),
            sender,
            recipients,
            body: body.into(),
            received_at: SystemTime::now(),
        }
    }

    /// A copy of this envelope addressed to a different set of recipients
    #[must_use]
    pub fn with_recipients(&self, recipients: Vec<Address>) -> Self {
        Self {
            recipients,
            ..self.clone()
        }
    }

    /// First value of the named header, if the header section parses
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        let (headers, _) = mailparse::parse_headers(&self.body).ok()?;
        headers.get_first_value(name)
    }

    /// The raw header section, without the blank line separating the body
    #[must_use]
    pub fn header_section(&self) -> &[u8] {
        let end = self
            .body
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .or_else(|| self.body.windows(2).position(|w| w == b"\n\n"))
            .unwrap_or(self.body.len());

        &self.body[..end]
    }

    /// Add a header field in front of the existing header section
    pub fn prepend_header(&mut self, name: &str, value: &str) {
        let mut body = Vec::with_capacity(name.len() + value.len() + 4 + self.body.len());
        body.extend_from_slice(name.as_bytes());
        body.extend_from_slice(b": ");
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&self.body);

        self.body = Arc::from(body);
    }
}
