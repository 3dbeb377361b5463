//! The order message model and its wire encoding.

pub mod error;
pub mod order;

pub use error::*;
pub use order::*;
