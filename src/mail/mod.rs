//! Inbound mail handling: MIME parsing and body extraction.

mod html;
pub mod parser;

pub use html::html_to_text;
pub use parser::{parse_raw, parse_raw_for, sanitize_message_id};
