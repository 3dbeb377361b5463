//! Error types for building and (de)serializing orders.

use thiserror::Error;

/// An order failed validation and never reaches the wire.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("user must not be empty")]
    EmptyUser,

    #[error("item must not be empty")]
    EmptyItem,

    #[error("quantity must be at least 1")]
    ZeroQuantity,

    #[error("order_id must not be empty")]
    EmptyOrderId,
}

/// The order could not be serialized.
#[derive(Debug, Error)]
#[error("Order encoding failed: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// A payload could not be turned back into an [`Order`](crate::model::Order).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("payload is not a valid order document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload carries an invalid order: {0}")]
    Invalid(#[from] ValidationError),
}
