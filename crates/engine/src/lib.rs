//! # Engine
//!
//! The two independent envelope producers:
//!
//! - [`ChainHeadMonitor`] turns upstream head notifications into `BLOCK_DATA`
//!   envelopes, guarded by a process-wide [`BlockCursor`].
//! - [`TelemetryProducer`] publishes rolling profit telemetry on a timer.
//!
//! Neither knows about individual client connections; both publish through an
//! [`events::EnvelopeSink`].

pub mod cursor;
pub mod error;
pub mod monitor;
pub mod telemetry;

pub use cursor::BlockCursor;
pub use error::EngineError;
pub use monitor::ChainHeadMonitor;
pub use telemetry::{MetricsSource, RollingPnl, SyntheticMetrics, TelemetryProducer};
