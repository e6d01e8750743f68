//! Delivery Status Notification (DSN) generation per RFC 3464
//!
//! A bounce is produced when an item fails permanently or runs out of
//! attempts. It is addressed to the original sender from the null sender,
//! so a bounce that itself fails can never produce another one.
//!
//! # DSN Structure (RFC 3464)
//! ```text
//! multipart/report; report-type="delivery-status"
//! ├── Part 1: text/plain (human-readable explanation)
//! ├── Part 2: message/delivery-status (machine-readable status)
//! └── Part 3: text/rfc822-headers (original message headers)
//! ```

use std::{
    fmt::Write as _,
    time::{SystemTime, UNIX_EPOCH},
};

use mailchat_common::{Address, Envelope, EnhancedCode, tracing::info};

use crate::{error::DeliveryError, item::QueueItem};

/// Original headers beyond this size are cut off.
const MAX_HEADER_BYTES: usize = 1024;

/// Identity the bounces of a queue are sent with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsnConfig {
    /// Host name in the `Reporting-MTA` field.
    pub reporting_mta: String,
    /// Domain of the `From: MAILER-DAEMON@...` header.
    pub from_domain: String,
}

impl Default for DsnConfig {
    fn default() -> Self {
        Self {
            reporting_mta: "localhost".to_string(),
            from_domain: "localhost".to_string(),
        }
    }
}

/// Why the item is being bounced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BounceReason {
    /// The target refused the message for good.
    Permanent,
    /// Every allowed attempt failed temporarily.
    Exhausted,
}

/// Whether a failed item should produce a bounce.
///
/// Items from the null sender never do.
#[must_use]
pub fn should_generate_dsn(item: &QueueItem) -> bool {
    !item.sender.is_null()
}

/// Build the bounce for `item` as a new envelope ready to be routed.
#[must_use]
pub fn generate_dsn(
    item: &QueueItem,
    original_headers: &[u8],
    error: &DeliveryError,
    reason: BounceReason,
    last_attempt: SystemTime,
    config: &DsnConfig,
) -> Envelope {
    info!(
        message_id = %item.message_id,
        recipient = %item.recipient,
        error = %error,
        "Generating DSN for failed delivery"
    );

    let human_readable = build_human_readable_part(item, error, reason, config);
    let machine_readable =
        build_machine_readable_part(item, error, reason, last_attempt, config);
    let original_headers = extract_original_headers(original_headers);

    let boundary = format!(
        "----=_Part_{}_{}",
        ulid::Ulid::new(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros()
    );

    let body = format!(
        "Content-Type: multipart/report; report-type=\"delivery-status\"; boundary=\"{boundary}\"\r\n\
        MIME-Version: 1.0\r\n\
        Date: {date}\r\n\
        From: Mail Delivery System <MAILER-DAEMON@{from_domain}>\r\n\
        To: {sender}\r\n\
        Subject: Delivery Status Notification (Failure)\r\n\
        Auto-Submitted: auto-replied\r\n\
        \r\n\
        This is a multi-part message in MIME format.\r\n\
        \r\n\
        --{boundary}\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        Content-Transfer-Encoding: 7bit\r\n\
        \r\n\
        {human_readable}\r\n\
        --{boundary}\r\n\
        Content-Type: message/delivery-status\r\n\
        Content-Transfer-Encoding: 7bit\r\n\
        \r\n\
        {machine_readable}\r\n\
        --{boundary}\r\n\
        Content-Type: text/rfc822-headers\r\n\
        Content-Transfer-Encoding: 7bit\r\n\
        \r\n\
        {original_headers}\r\n\
        --{boundary}--\r\n",
        date = format_date(SystemTime::now()),
        from_domain = config.from_domain,
        sender = item.sender,
    );

    Envelope::new(
        Address::null(),
        vec![item.sender.clone()],
        body.into_bytes(),
    )
}

/// Part 1
fn build_human_readable_part(
    item: &QueueItem,
    error: &DeliveryError,
    reason: BounceReason,
    config: &DsnConfig,
) -> String {
    let explanation = match reason {
        BounceReason::Permanent => "The recipient's mail system refused the message.",
        BounceReason::Exhausted => "The message could not be delivered after repeated attempts.",
    };

    format!(
        "This is the mail system at host {host}.\r\n\
        \r\n\
        I'm sorry to have to inform you that your message could not\r\n\
        be delivered to one or more recipients.\r\n\
        \r\n\
        {explanation}\r\n\
        \r\n\
        <{recipient}>: {reply}\r\n\
        \r\n\
        Message details:\r\n\
        - Original sender: {sender}\r\n\
        - Failed recipient: {recipient}\r\n\
        - Delivery attempts: {attempts}\r\n",
        host = config.reporting_mta,
        recipient = item.recipient,
        reply = error.reply(),
        sender = item.sender,
        attempts = item.attempt,
    )
}

/// Part 2
fn build_machine_readable_part(
    item: &QueueItem,
    error: &DeliveryError,
    reason: BounceReason,
    last_attempt: SystemTime,
    config: &DsnConfig,
) -> String {
    let reply = error.reply();

    // Exhausted items report the temporary class they kept failing with.
    let status = match reason {
        BounceReason::Permanent if reply.enhanced.0 == 5 => reply.enhanced,
        BounceReason::Permanent => EnhancedCode(5, 0, 0),
        BounceReason::Exhausted if reply.enhanced.0 == 4 => reply.enhanced,
        BounceReason::Exhausted => EnhancedCode(4, 0, 0),
    };

    let mut dsn = format!("Reporting-MTA: dns; {}\r\n", config.reporting_mta);
    let _ = write!(dsn, "Arrival-Date: {}\r\n", format_date(item.queued_at));

    dsn.push_str("\r\n");
    let _ = write!(dsn, "Final-Recipient: rfc822; {}\r\n", item.recipient);
    dsn.push_str("Action: failed\r\n");
    let _ = write!(dsn, "Status: {status}\r\n");
    let _ = write!(dsn, "Diagnostic-Code: smtp; {reply}\r\n");
    let _ = write!(dsn, "Last-Attempt-Date: {}\r\n", format_date(last_attempt));

    dsn
}

/// Part 3
fn extract_original_headers(headers: &[u8]) -> String {
    if headers.is_empty() {
        return String::from("(No message data available)");
    }

    let end = headers.len().min(MAX_HEADER_BYTES);
    String::from_utf8_lossy(&headers[..end]).to_string()
}

fn format_date(time: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time).to_rfc2822()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use mailchat_common::{MessageId, Reply, Status};

    use super::*;
    use crate::{
        error::{PermanentError, TemporaryError},
        item::BodyId,
    };

    fn item(sender: &str) -> QueueItem {
        let mut item = QueueItem::new(
            MessageId::generate(),
            BodyId::generate(),
            Address::parse(sender).unwrap(),
            Address::parse("recipient@b.com").unwrap(),
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        );
        item.attempt = 1;
        item
    }

    fn body(envelope: &Envelope) -> String {
        String::from_utf8_lossy(&envelope.body).to_string()
    }

    #[test]
    fn test_should_not_generate_dsn_null_sender() {
        assert!(!should_generate_dsn(&item("<>")));
        assert!(should_generate_dsn(&item("sender@example.com")));
    }

    #[test]
    fn test_generate_dsn_permanent_failure() {
        let item = item("sender@example.com");
        let error = DeliveryError::Permanent(PermanentError::Rejected(Reply::no_such_user()));

        let dsn = generate_dsn(
            &item,
            b"From: sender@example.com\r\nSubject: Test",
            &error,
            BounceReason::Permanent,
            SystemTime::now(),
            &DsnConfig {
                reporting_mta: "mx.example.com".to_string(),
                from_domain: "example.com".to_string(),
            },
        );

        assert!(dsn.sender.is_null());
        assert_eq!(dsn.recipients, vec![item.sender.clone()]);

        let body = body(&dsn);
        assert!(body.contains("multipart/report"));
        assert!(body.contains("Auto-Submitted: auto-replied"));
        assert!(body.contains("From: Mail Delivery System <MAILER-DAEMON@example.com>"));
        assert!(body.contains("Reporting-MTA: dns; mx.example.com"));
        assert!(body.contains("Final-Recipient: rfc822; recipient@b.com"));
        assert!(body.contains("Action: failed"));
        assert!(body.contains("Status: 5.1.1"));
        assert!(body.contains("Diagnostic-Code: smtp; 550 5.1.1 User doesn't exist"));
        assert!(body.contains("Arrival-Date: "));
        assert!(body.contains("Subject: Test"));

        assert_eq!(
            dsn.header("Subject").as_deref(),
            Some("Delivery Status Notification (Failure)")
        );
    }

    #[test]
    fn test_generate_dsn_exhausted_retries() {
        let item = item("sender@example.com");
        let error = DeliveryError::Temporary(TemporaryError::Deferred(Reply::new(
            Status::MailboxUnavailable,
            EnhancedCode(4, 2, 1),
            "Mailbox busy",
        )));

        let dsn = generate_dsn(
            &item,
            b"",
            &error,
            BounceReason::Exhausted,
            SystemTime::now(),
            &DsnConfig::default(),
        );

        let body = body(&dsn);
        assert!(body.contains("Status: 4.2.1"));
        assert!(body.contains("after repeated attempts"));
        assert!(body.contains("(No message data available)"));
    }
}
