//! Notification rendering: text, download link and deactivate button.
//!
//! A payload carries exactly two actions. There is no reply action and the
//! type has no way to express one.

use chrono::Utc;

use crate::capability::{LinkSigner, claims_from_url};
use crate::error::CapabilityError;
use crate::model::ProcessedRecord;
use crate::summarizer::truncate_chars;

/// Cap on the rendered text, below Telegram's 4096-char `sendMessage` limit.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Subjects longer than this are cut before rendering.
const MAX_SUBJECT_CHARS: usize = 200;

const CALLBACK_PREFIX: &str = "deactivate";

/// A button attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Opens the signed download link.
    Download { url: String },
    /// Disables the address the notification arrived on.
    Deactivate { owner_id: String, address_id: String },
}

impl Action {
    /// Button label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Download { .. } => "📥 Download original",
            Self::Deactivate { .. } => "🚫 Disable this address",
        }
    }

    /// Callback payload (`deactivate:{owner}:{address}`). Only deactivate has one.
    pub fn callback_data(&self) -> Option<String> {
        match self {
            Self::Deactivate {
                owner_id,
                address_id,
            } => Some(format!("{CALLBACK_PREFIX}:{owner_id}:{address_id}")),
            Self::Download { .. } => None,
        }
    }

    /// Inverse of `callback_data`.
    pub fn from_callback_data(data: &str) -> Option<Self> {
        let mut parts = data.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(CALLBACK_PREFIX), Some(owner_id), Some(address_id))
                if !owner_id.is_empty() && !address_id.is_empty() =>
            {
                Some(Self::Deactivate {
                    owner_id: owner_id.to_string(),
                    address_id: address_id.to_string(),
                })
            }
            _ => None,
        }
    }

    /// The `(owner_id, address_id)` this action is bound to.
    pub fn target(&self) -> Option<(String, String)> {
        match self {
            Self::Deactivate {
                owner_id,
                address_id,
            } => Some((owner_id.clone(), address_id.clone())),
            Self::Download { url } => claims_from_url(url)
                .ok()
                .map(|(claims, _)| (claims.owner_id, claims.address_id)),
        }
    }
}

/// A rendered notification, ready for a messenger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePayload {
    /// Telegram Markdown text.
    pub text: String,
    /// Download first, deactivate second.
    pub actions: [Action; 2],
}

/// Builds payloads for records.
#[derive(Clone)]
pub struct Renderer {
    signer: LinkSigner,
    mail_domain: String,
}

impl Renderer {
    pub fn new(signer: LinkSigner, mail_domain: impl Into<String>) -> Self {
        Self {
            signer,
            mail_domain: mail_domain.into(),
        }
    }

    /// Render a record. Safe to repeat; only the link expiry changes.
    pub fn render(&self, record: &ProcessedRecord) -> Result<MessagePayload, CapabilityError> {
        let url = self.signer.sign_url(
            &record.owner_id,
            &record.address_id,
            &record.message_id,
            Utc::now(),
        )?;

        Ok(MessagePayload {
            text: self.render_text(record),
            actions: [
                Action::Download { url },
                Action::Deactivate {
                    owner_id: record.owner_id.clone(),
                    address_id: record.address_id.clone(),
                },
            ],
        })
    }

    fn render_text(&self, record: &ProcessedRecord) -> String {
        let subject = if record.subject.trim().is_empty() {
            "(no subject)".to_string()
        } else {
            truncate_chars(record.subject.trim(), MAX_SUBJECT_CHARS)
        };

        let header = format!(
            "📧 *New Email Summary*\n\n*To:* {}\n*Subject:* {}\n\n*Summary:*\n",
            escape_markdown(&format!("{}@{}", record.address_id, self.mail_domain)),
            escape_markdown(&subject),
        );
        let room = MAX_MESSAGE_CHARS.saturating_sub(header.chars().count());
        format!("{header}{}", fit_escaped(&record.summary_text, room))
    }
}

/// Escape Telegram legacy-Markdown control characters.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Plain-text form of legacy Markdown: escapes resolved, formatting
/// markers dropped.
pub fn markdown_to_plain(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some(next @ ('_' | '*' | '`' | '[')) => out.push(next),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            '_' | '*' | '`' => {}
            _ => out.push(ch),
        }
    }
    out
}

/// Escaped text no longer than `room` chars, truncating the source as needed.
fn fit_escaped(text: &str, room: usize) -> String {
    let mut budget = room;
    loop {
        let escaped = escape_markdown(&truncate_chars(text, budget));
        let len = escaped.chars().count();
        if len <= room || budget == 0 {
            return escaped;
        }
        budget = budget.saturating_sub(len - room).min(budget - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InboundMessage, RawObjectRef, SummarySource};
    use chrono::Duration;
    use secrecy::SecretString;

    fn renderer() -> Renderer {
        let signer = LinkSigner::new(
            "https://relay.example",
            SecretString::from("k"),
            Duration::hours(12),
        )
        .unwrap();
        Renderer::new(signer, "relay.example")
    }

    fn record(subject: &str, summary: &str) -> ProcessedRecord {
        let message = InboundMessage {
            message_id: "msg-1".into(),
            recipient_address_id: "abcd1234".into(),
            subject: subject.into(),
            plain_text_body: String::new(),
            raw_object_ref: RawObjectRef::new("abcd1234/msg-1.eml"),
        };
        ProcessedRecord::pending(&message, "42", summary, SummarySource::Remote)
    }

    #[test]
    fn payload_has_download_then_deactivate() {
        let payload = renderer().render(&record("Invoice", "Pay it.")).unwrap();
        assert!(matches!(payload.actions[0], Action::Download { .. }));
        assert_eq!(
            payload.actions[1],
            Action::Deactivate {
                owner_id: "42".into(),
                address_id: "abcd1234".into()
            }
        );
        assert!(payload.text.contains("*Subject:* Invoice"));
        assert!(payload.text.contains("Pay it."));
        assert!(payload.text.contains("abcd1234@relay.example"));
    }

    #[test]
    fn both_actions_round_trip_to_owner_and_address() {
        let rec = record("Invoice", "Pay it.");
        let payload = renderer().render(&rec).unwrap();
        for action in &payload.actions {
            assert_eq!(
                action.target(),
                Some((rec.owner_id.clone(), rec.address_id.clone()))
            );
        }

        let data = payload.actions[1].callback_data().unwrap();
        assert_eq!(data, "deactivate:42:abcd1234");
        assert_eq!(
            Action::from_callback_data(&data).as_ref(),
            Some(&payload.actions[1])
        );
    }

    #[test]
    fn bad_callback_data_is_ignored() {
        for data in ["", "deactivate", "deactivate:42", "deactivate::x", "reply:42:abcd1234"] {
            assert!(Action::from_callback_data(data).is_none(), "{data}");
        }
    }

    #[test]
    fn markdown_is_escaped() {
        let payload = renderer()
            .render(&record("re_ply *now*", "see [link] `code`"))
            .unwrap();
        assert!(payload.text.contains(r"re\_ply \*now\*"));
        assert!(payload.text.contains(r"see \[link] \`code\`"));
    }

    #[test]
    fn empty_subject_has_placeholder() {
        let payload = renderer().render(&record("  ", "x")).unwrap();
        assert!(payload.text.contains("(no subject)"));
    }

    #[test]
    fn long_summary_is_capped() {
        let payload = renderer()
            .render(&record("Big", &"word_ ".repeat(2000)))
            .unwrap();
        assert!(payload.text.chars().count() <= MAX_MESSAGE_CHARS);
        assert!(payload.text.ends_with("..."));
    }

    #[test]
    fn rendering_is_repeatable() {
        let r = renderer();
        let rec = record("Invoice", "Pay it.");
        let a = r.render(&rec).unwrap();
        let b = r.render(&rec).unwrap();
        assert_eq!(a.text, b.text);
        assert_eq!(a.actions[1], b.actions[1]);
    }

    #[test]
    fn plain_form_drops_escapes_and_markers() {
        let source = "re_ply *now* see [link] `code` C:\\tmp";
        assert_eq!(markdown_to_plain(&escape_markdown(source)), source);

        let payload = renderer().render(&record("a_b", "x*y")).unwrap();
        let plain = markdown_to_plain(&payload.text);
        assert!(plain.contains("Subject: a_b"), "{plain}");
        assert!(plain.ends_with("x*y"));
        assert!(!plain.contains('\\'));
    }
}
