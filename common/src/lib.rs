//! Exchequer Common Types
//!
//! Shared types used across the Exchequer offer and settlement engine:
//! the currency and amount model, identifiers, offer lifecycle states,
//! the service error taxonomy and timing constants.

pub mod identifiers;
pub mod monetary;
pub mod settlement;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use settlement::*;
pub use error::*;
pub use time::*;
