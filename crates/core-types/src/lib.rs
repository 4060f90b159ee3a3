//! # Core Types
//!
//! Chain primitives shared by every layer of the broadcaster: block numbers,
//! resolved block detail, fee data and the hex-quantity helpers used to decode
//! JSON-RPC responses.

pub mod error;
pub mod quantity;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use error::CoreError;
pub use quantity::{parse_quantity, parse_quantity_u128, wei_to_gwei};
pub use structs::{BlockDetail, BlockNumber, FeeData};
