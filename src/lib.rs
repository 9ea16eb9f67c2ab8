//! Inbox Relay: mail to Telegram summaries with throwaway addresses.

pub mod capability;
pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod raw;
pub mod registry;
pub mod server;
pub mod store;
pub mod summarizer;
