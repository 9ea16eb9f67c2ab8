//! Raw RFC 5322 bytes → `InboundMessage`.
//!
//! Pure: no I/O, no clock, no randomness. The same bytes and reference
//! always produce the same result.

use mail_parser::{Message, MessageParser, MimeHeaders, PartType};

use crate::error::ParseError;
use crate::mail::html::html_to_text;
use crate::model::{InboundMessage, RawObjectRef};

/// Bodies longer than this (in chars) are cut.
pub const MAX_BODY_CHARS: usize = 15_000;

const TRUNCATION_NOTE: &str = "...\n[Email truncated]";

/// Headers consulted for the recipient, in priority order.
const RECIPIENT_HEADERS: [&str; 2] = ["X-Original-To", "Delivered-To"];

/// Parse one raw message.
pub fn parse_raw(raw: &[u8], raw_ref: &RawObjectRef) -> Result<InboundMessage, ParseError> {
    parse_raw_for(raw, raw_ref, None)
}

/// Parse one raw message delivered to a known envelope recipient.
///
/// The envelope recipient, when given, wins over the headers.
pub fn parse_raw_for(
    raw: &[u8],
    raw_ref: &RawObjectRef,
    envelope_recipient: Option<&str>,
) -> Result<InboundMessage, ParseError> {
    if raw.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ParseError::Empty);
    }

    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or(ParseError::Malformed)?;

    let recipient_address_id = envelope_recipient
        .and_then(|r| local_part(&first_address(r).unwrap_or_else(|| r.to_string())))
        .or_else(|| extract_recipient(&parsed))
        .ok_or(ParseError::NoRecipient)?;

    let message_id = parsed
        .message_id()
        .and_then(sanitize_message_id)
        .or_else(|| sanitize_message_id(raw_ref.file_stem()))
        .ok_or(ParseError::NoMessageId)?;

    let subject = parsed.subject().unwrap_or_default().trim().to_string();
    let plain_text_body = truncate_body(extract_body(&parsed));

    Ok(InboundMessage {
        message_id,
        recipient_address_id,
        subject,
        plain_text_body,
        raw_object_ref: raw_ref.clone(),
    })
}

/// Keep only `[A-Za-z0-9_-]`. `None` when nothing survives.
pub fn sanitize_message_id(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Lowercased local part of the first recipient found.
fn extract_recipient(parsed: &Message) -> Option<String> {
    let from_headers = RECIPIENT_HEADERS
        .iter()
        .find_map(|name| parsed.header_raw(*name).and_then(first_address));

    let address = from_headers.or_else(|| {
        parsed
            .to()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string())
    })?;

    local_part(&address)
}

/// First mailbox of a header value like `Name <a@b>, c@d`.
fn first_address(value: &str) -> Option<String> {
    let first = value.split(',').next()?.trim();
    let inner = match (first.find('<'), first.rfind('>')) {
        (Some(start), Some(end)) if start < end => &first[start + 1..end],
        _ => first,
    };
    let inner = inner.trim();
    if inner.contains('@') {
        Some(inner.to_string())
    } else {
        None
    }
}

fn local_part(address: &str) -> Option<String> {
    let local = address.split('@').next()?.trim().to_lowercase();
    if local.is_empty() { None } else { Some(local) }
}

/// Body from mail-parser's own body classification.
///
/// Parts mail-parser files as attachments never appear here. Parts with a
/// `Content-ID` are referenced from another part and are skipped too.
fn extract_body(parsed: &Message) -> String {
    parsed
        .text_body
        .iter()
        .chain(&parsed.html_body)
        .filter_map(|&id| parsed.parts.get(id as usize))
        .filter(|part| part.content_id().is_none())
        .find_map(|part| match &part.body {
            PartType::Text(text) => Some(text.trim().to_string()),
            PartType::Html(html) => Some(html_to_text(html)),
            _ => None,
        })
        .unwrap_or_default()
}

fn truncate_body(body: String) -> String {
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((cut, _)) => format!("{}{}", &body[..cut], TRUNCATION_NOTE),
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_ref() -> RawObjectRef {
        RawObjectRef::new("abcd1234/2025/01/02/fallback-id.eml")
    }

    const SIMPLE: &str = "From: Alice <alice@example.com>\r\n\
To: abcd1234@relay.example\r\n\
Subject: Lunch?\r\n\
Message-ID: <CA+abc.123@mail.example.com>\r\n\
\r\n\
Are you free at noon?\r\n";

    #[test]
    fn parses_simple_message() {
        let msg = parse_raw(SIMPLE.as_bytes(), &raw_ref()).unwrap();
        assert_eq!(msg.recipient_address_id, "abcd1234");
        assert_eq!(msg.subject, "Lunch?");
        assert_eq!(msg.plain_text_body, "Are you free at noon?");
        assert_eq!(msg.message_id, "CAabc123mailexamplecom");
        assert_eq!(msg.raw_object_ref, raw_ref());
    }

    #[test]
    fn parsing_is_deterministic() {
        let a = parse_raw(SIMPLE.as_bytes(), &raw_ref()).unwrap();
        let b = parse_raw(SIMPLE.as_bytes(), &raw_ref()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn original_to_header_wins_over_to() {
        let raw = "X-Original-To: <Zz99yy88@relay.example>\r\n\
Delivered-To: other@relay.example\r\n\
To: someone@else.example\r\n\
Message-ID: <m1@x>\r\n\
\r\n\
body\r\n";
        let msg = parse_raw(raw.as_bytes(), &raw_ref()).unwrap();
        assert_eq!(msg.recipient_address_id, "zz99yy88");
    }

    #[test]
    fn envelope_recipient_wins_over_headers() {
        let msg = parse_raw_for(
            SIMPLE.as_bytes(),
            &raw_ref(),
            Some("ENVL0PE1@relay.example"),
        )
        .unwrap();
        assert_eq!(msg.recipient_address_id, "envl0pe1");

        let raw = "Subject: bcc only\r\nMessage-ID: <m1@x>\r\n\r\nhi\r\n";
        let msg = parse_raw_for(raw.as_bytes(), &raw_ref(), Some("abcd1234@relay.example")).unwrap();
        assert_eq!(msg.recipient_address_id, "abcd1234");
    }

    #[test]
    fn delivered_to_used_when_original_to_missing() {
        let raw = "Delivered-To: qqqq1111@relay.example\r\n\
To: someone@else.example\r\n\
Message-ID: <m1@x>\r\n\
\r\n\
body\r\n";
        let msg = parse_raw(raw.as_bytes(), &raw_ref()).unwrap();
        assert_eq!(msg.recipient_address_id, "qqqq1111");
    }

    #[test]
    fn missing_subject_is_empty() {
        let raw = "To: abcd1234@relay.example\r\nMessage-ID: <m1@x>\r\n\r\nhi\r\n";
        let msg = parse_raw(raw.as_bytes(), &raw_ref()).unwrap();
        assert_eq!(msg.subject, "");
    }

    #[test]
    fn message_id_falls_back_to_raw_ref_stem() {
        let raw = "To: abcd1234@relay.example\r\nSubject: x\r\n\r\nhi\r\n";
        let msg = parse_raw(raw.as_bytes(), &raw_ref()).unwrap();
        assert_eq!(msg.message_id, "fallback-id");
    }

    #[test]
    fn no_message_id_anywhere_is_unparseable() {
        let raw = "To: abcd1234@relay.example\r\nSubject: x\r\n\r\nhi\r\n";
        let err = parse_raw(raw.as_bytes(), &RawObjectRef::new("dir/...eml")).unwrap_err();
        assert_eq!(err, ParseError::NoMessageId);
    }

    #[test]
    fn empty_input_is_unparseable() {
        assert_eq!(parse_raw(b"", &raw_ref()).unwrap_err(), ParseError::Empty);
        assert_eq!(parse_raw(b" \r\n", &raw_ref()).unwrap_err(), ParseError::Empty);
    }

    #[test]
    fn no_recipient_is_unparseable() {
        let raw = "Subject: orphan\r\nMessage-ID: <m1@x>\r\n\r\nhi\r\n";
        assert_eq!(
            parse_raw(raw.as_bytes(), &raw_ref()).unwrap_err(),
            ParseError::NoRecipient
        );
    }

    #[test]
    fn html_only_body_is_stripped() {
        let raw = "To: abcd1234@relay.example\r\n\
Message-ID: <m1@x>\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><body><p>Hello <b>there</b></p><script>evil()</script></body></html>\r\n";
        let msg = parse_raw(raw.as_bytes(), &raw_ref()).unwrap();
        assert_eq!(msg.plain_text_body, "Hello there");
    }

    #[test]
    fn plain_part_preferred_over_html() {
        let raw = "To: abcd1234@relay.example\r\n\
Message-ID: <m1@x>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Plain version\r\n\
--b1\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>HTML version</p>\r\n\
--b1--\r\n";
        let msg = parse_raw(raw.as_bytes(), &raw_ref()).unwrap();
        assert_eq!(msg.plain_text_body, "Plain version");
    }

    #[test]
    fn attachments_and_inline_parts_never_leak() {
        let raw = "To: abcd1234@relay.example\r\n\
Message-ID: <m1@x>\r\n\
Subject: Report\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
--outer\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Disposition: attachment; filename=\"secret.txt\"\r\n\
\r\n\
ATTACHMENT-SECRET\r\n\
--outer\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-ID: <inline1>\r\n\
\r\n\
INLINE-SECRET\r\n\
--outer\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
See the attached report.\r\n\
--outer\r\n\
Content-Type: image/png\r\n\
Content-Disposition: inline; filename=\"logo.png\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw0KGgo=\r\n\
--outer--\r\n";
        let msg = parse_raw(raw.as_bytes(), &raw_ref()).unwrap();
        assert_eq!(msg.plain_text_body, "See the attached report.");
        assert!(!msg.plain_text_body.contains("SECRET"));
        assert!(!msg.plain_text_body.contains("iVBOR"));
    }

    #[test]
    fn named_text_part_is_an_attachment_not_the_body() {
        let raw = "To: abcd1234@relay.example\r\n\
Message-ID: <m1@x>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Real body</p>\r\n\
--b\r\n\
Content-Type: text/plain; name=\"passwords.txt\"\r\n\
\r\n\
ATTACHMENT-SECRET\r\n\
--b--\r\n";
        let msg = parse_raw(raw.as_bytes(), &raw_ref()).unwrap();
        assert!(msg.plain_text_body.contains("Real body"), "{}", msg.plain_text_body);
        assert!(!msg.plain_text_body.contains("ATTACHMENT-SECRET"));
    }

    #[test]
    fn calendar_invite_is_never_the_body() {
        let raw = "To: abcd1234@relay.example\r\n\
Message-ID: <m1@x>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Real body</p>\r\n\
--b\r\n\
Content-Type: text/calendar; method=REQUEST; name=\"invite.ics\"\r\n\
\r\n\
BEGIN:VCALENDAR\r\n\
SUMMARY:CALENDAR-SECRET\r\n\
END:VCALENDAR\r\n\
--b--\r\n";
        let msg = parse_raw(raw.as_bytes(), &raw_ref()).unwrap();
        assert!(msg.plain_text_body.contains("Real body"), "{}", msg.plain_text_body);
        assert!(!msg.plain_text_body.contains("CALENDAR-SECRET"));
        assert!(!msg.plain_text_body.contains("VCALENDAR"));
    }

    #[test]
    fn only_attachments_gives_empty_body() {
        let raw = "To: abcd1234@relay.example\r\n\
Message-ID: <m1@x>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: application/pdf\r\n\
Content-Disposition: attachment; filename=\"a.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQ=\r\n\
--b--\r\n";
        let msg = parse_raw(raw.as_bytes(), &raw_ref()).unwrap();
        assert_eq!(msg.plain_text_body, "");
    }

    #[test]
    fn long_body_is_truncated_on_char_boundary() {
        let body = "é".repeat(MAX_BODY_CHARS + 10);
        let raw = format!(
            "To: abcd1234@relay.example\r\nMessage-ID: <m1@x>\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
        );
        let msg = parse_raw(raw.as_bytes(), &raw_ref()).unwrap();
        assert!(msg.plain_text_body.ends_with("[Email truncated]"));
        assert_eq!(
            msg.plain_text_body.chars().count(),
            MAX_BODY_CHARS + TRUNCATION_NOTE.chars().count()
        );
    }

    #[test]
    fn sanitize_message_id_filters_characters() {
        assert_eq!(
            sanitize_message_id("<abc.DEF_1-2@host>").as_deref(),
            Some("abcDEF_1-2host")
        );
        assert_eq!(sanitize_message_id("<>@. "), None);
    }

    #[test]
    fn first_address_handles_display_names() {
        assert_eq!(
            first_address("Bob <bob@x.example>, c@d").as_deref(),
            Some("bob@x.example")
        );
        assert_eq!(first_address("no-at-sign"), None);
    }
}
