use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Height of a block on the monitored chain. Zero doubles as "no block seen".
pub type BlockNumber = u64;

/// The subset of a block header the broadcaster cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDetail {
    pub number: BlockNumber,
    pub timestamp: DateTime<Utc>,
    /// EIP-1559 base fee in wei. Absent on pre-London chains.
    pub base_fee_per_gas: Option<u128>,
}

/// Fee data resolved alongside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeData {
    /// Current gas price in wei.
    pub gas_price: u128,
}

impl FeeData {
    pub fn gas_price_gwei(&self) -> Decimal {
        crate::wei_to_gwei(self.gas_price)
    }
}

impl BlockDetail {
    pub fn base_fee_gwei(&self) -> Option<Decimal> {
        self.base_fee_per_gas.map(crate::wei_to_gwei)
    }
}
