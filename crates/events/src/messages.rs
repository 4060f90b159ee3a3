use crate::error::EventsError;
use chrono::{DateTime, SecondsFormat, Utc};
use core_types::{BlockDetail, BlockNumber, FeeData};
use rust_decimal::Decimal;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;

/// Greeting carried by the handshake envelope.
pub const WELCOME_MESSAGE: &str = "Connected to blockpulse telemetry stream";

/// The closed set of envelope categories clients filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeType {
    System,
    BlockData,
    ProfitDrop,
    Confirmation,
    Withdrawal,
    Telemetry,
    Alert,
}

/// Severity attached to an `ALERT` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warn,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
}

/// A confirmed new block, with fees in gwei.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDataPayload {
    pub block_number: BlockNumber,
    pub gas_price_gwei: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_gwei: Option<Decimal>,
    pub block_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitDropPayload {
    pub previous_pnl: Decimal,
    pub current_pnl: Decimal,
    pub delta: Decimal,
    pub threshold: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationPayload {
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<BlockNumber>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalPayload {
    pub reference: String,
    pub amount: Decimal,
    pub asset: String,
}

/// Rolling profit aggregate published on every telemetry tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub cumulative_pnl: Decimal,
    pub pnl_delta: Decimal,
    pub peak_pnl: Decimal,
    pub drawdown_pct: Decimal,
    /// Total samples folded in since startup.
    pub samples: u64,
    /// Deltas currently held in the rolling window, oldest first.
    pub window: Vec<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub level: AlertLevel,
    pub message: String,
}

/// The body of an envelope. One variant per `EnvelopeType`, so the declared
/// type of an envelope is always derived from what it actually carries.
///
/// Serializes as the bare inner object; the tag lives in the envelope's
/// `type` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    System(SystemPayload),
    BlockData(BlockDataPayload),
    ProfitDrop(ProfitDropPayload),
    Confirmation(ConfirmationPayload),
    Withdrawal(WithdrawalPayload),
    Telemetry(TelemetryPayload),
    Alert(AlertPayload),
}

impl Payload {
    pub fn kind(&self) -> EnvelopeType {
        match self {
            Payload::System(_) => EnvelopeType::System,
            Payload::BlockData(_) => EnvelopeType::BlockData,
            Payload::ProfitDrop(_) => EnvelopeType::ProfitDrop,
            Payload::Confirmation(_) => EnvelopeType::Confirmation,
            Payload::Withdrawal(_) => EnvelopeType::Withdrawal,
            Payload::Telemetry(_) => EnvelopeType::Telemetry,
            Payload::Alert(_) => EnvelopeType::Alert,
        }
    }

    fn decode(kind: EnvelopeType, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EnvelopeType::System => Payload::System(serde_json::from_value(value)?),
            EnvelopeType::BlockData => Payload::BlockData(serde_json::from_value(value)?),
            EnvelopeType::ProfitDrop => Payload::ProfitDrop(serde_json::from_value(value)?),
            EnvelopeType::Confirmation => Payload::Confirmation(serde_json::from_value(value)?),
            EnvelopeType::Withdrawal => Payload::Withdrawal(serde_json::from_value(value)?),
            EnvelopeType::Telemetry => Payload::Telemetry(serde_json::from_value(value)?),
            EnvelopeType::Alert => Payload::Alert(serde_json::from_value(value)?),
        })
    }
}

/// The unit of transmission to every dashboard client.
///
/// On the wire an envelope is a single JSON object:
/// `{
///   "type": "BLOCK_DATA",
///   "timestamp": "2024-05-01T12:00:00.000Z",
///   "payload": { "block_number": 19000000, ... }
/// }`
///
/// The timestamp is assigned when the envelope is built (send time), not
/// when the underlying event happened.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    timestamp: DateTime<Utc>,
    payload: Payload,
}

impl Envelope {
    pub fn new(payload: Payload) -> Self {
        Self::at(Utc::now(), payload)
    }

    pub fn at(timestamp: DateTime<Utc>, payload: Payload) -> Self {
        Self { timestamp, payload }
    }

    /// The SYSTEM envelope every client receives first.
    pub fn handshake() -> Self {
        Self::new(Payload::System(SystemPayload {
            message: WELCOME_MESSAGE.to_string(),
            server_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }))
    }

    pub fn block_data(block: &BlockDetail, fees: &FeeData) -> Self {
        Self::new(Payload::BlockData(BlockDataPayload {
            block_number: block.number,
            gas_price_gwei: fees.gas_price_gwei(),
            base_fee_gwei: block.base_fee_gwei(),
            block_timestamp: block.timestamp,
        }))
    }

    pub fn alert(level: AlertLevel, message: impl Into<String>) -> Self {
        Self::new(Payload::Alert(AlertPayload {
            level,
            message: message.into(),
        }))
    }

    pub fn kind(&self) -> EnvelopeType {
        self.payload.kind()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Serializes the envelope into a shareable text frame.
    pub fn to_json(&self) -> Result<Arc<str>, EventsError> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }

    pub fn from_json(frame: &str) -> Result<Self, EventsError> {
        Ok(serde_json::from_str(frame)?)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Envelope", 3)?;
        state.serialize_field("type", &self.kind())?;
        state.serialize_field(
            "timestamp",
            &self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        )?;
        state.serialize_field("payload", &self.payload)?;
        state.end()
    }
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: EnvelopeType,
    timestamp: DateTime<Utc>,
    payload: serde_json::Value,
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireEnvelope::deserialize(deserializer)?;
        let payload = Payload::decode(wire.kind, wire.payload).map_err(serde::de::Error::custom)?;
        Ok(Envelope::at(wire.timestamp, payload))
    }
}
