//! # Events
//!
//! This crate defines the envelope structures pushed over WebSocket to the
//! dashboard clients, and the `EnvelopeSink` seam producers publish through.
//!
//! As a Layer 0 crate, it depends only on `core-types` and provides the definitive
//! wire contract for all real-time telemetry.

// Declare the modules that make up this crate.
pub mod error;
pub mod messages;
pub mod sink;

// Re-export the core types to provide a clean public API.
pub use error::EventsError;
pub use messages::{
    WELCOME_MESSAGE,
    AlertLevel, AlertPayload, BlockDataPayload, ConfirmationPayload, Envelope, EnvelopeType,
    Payload, ProfitDropPayload, SystemPayload, TelemetryPayload, WithdrawalPayload,
};
pub use sink::{EnvelopeSink, RecordingSink};
