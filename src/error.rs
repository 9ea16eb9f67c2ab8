//! Error types for inbox-relay.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Messaging channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    /// The owner's chat could not be reached. The record stays pending.
    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Channel health check failed: {name}")]
    HealthCheckFailed { name: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
}

/// Raw mail that cannot be turned into an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("raw message is empty")]
    Empty,

    #[error("raw message is not valid RFC 5322")]
    Malformed,

    #[error("no recipient address in X-Original-To, Delivered-To or To")]
    NoRecipient,

    #[error("no usable message id in headers or raw reference")]
    NoMessageId,
}

/// Address registry errors. All of these are user-visible, none are fatal.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("address {0} not found")]
    NotFound(String),

    #[error("address {address_id} does not belong to {owner_id}")]
    Forbidden { owner_id: String, address_id: String },

    #[error("could not allocate a unique address after {attempts} attempts")]
    AllocationExhausted { attempts: u32 },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Download capability errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("download link is malformed: {0}")]
    Malformed(String),

    #[error("download link signature does not match")]
    BadSignature,

    #[error("download link expired")]
    Expired,
}

/// Infrastructure faults inside the pipeline.
///
/// Anything here leaves stored state untouched so the trigger can be
/// redelivered.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("raw object {raw_ref} unavailable: {reason}")]
    RawObject { raw_ref: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
