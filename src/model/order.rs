//! The order carried by every message on the `orders` stream.
//!
//! An `Order` is built once per send request through [`Order::create`] and never
//! changes afterwards: all fields are private and only readable. The wire form is
//! produced by [`Order::encode`] and read back with [`Order::decode`].
use crate::model::{DecodeError, EncodeError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// Globally unique identifier for an order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Generates a fresh random (v4) identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Field order here is the wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    order_id: OrderId,
    user: String,
    item: String,
    quantity: u32,
}

/// Shape accepted on the wire. Anything beyond the four fields is rejected.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireOrder {
    order_id: String,
    user: String,
    item: String,
    quantity: u32,
}

impl Order {
    /// Creates a new order with a freshly generated [`OrderId`].
    ///
    /// # Errors
    /// - [`ValidationError::EmptyUser`] if `user` is empty or only whitespace
    /// - [`ValidationError::EmptyItem`] if `item` is empty or only whitespace
    /// - [`ValidationError::ZeroQuantity`] if `quantity` is 0
    pub fn create(
        user: impl Into<String>,
        item: impl Into<String>,
        quantity: u32,
    ) -> Result<Self, ValidationError> {
        let user = user.into();
        let item = item.into();
        validate_fields(&user, &item, quantity)?;
        Ok(Self {
            order_id: OrderId::generate(),
            user,
            item,
            quantity,
        })
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn item(&self) -> &str {
        &self.item
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Serializes the order into its canonical UTF-8 JSON form.
    ///
    /// The output is stable: `{"order_id":..,"user":..,"item":..,"quantity":..}`
    /// with no whitespace.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses an order from wire bytes.
    ///
    /// The decoded order keeps the identifier found on the wire.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(bytes)?;
        let wire: WireOrder = serde_json::from_str(text)?;
        if wire.order_id.trim().is_empty() {
            return Err(DecodeError::Invalid(ValidationError::EmptyOrderId));
        }
        validate_fields(&wire.user, &wire.item, wire.quantity)?;
        Ok(Self {
            order_id: OrderId(wire.order_id),
            user: wire.user,
            item: wire.item,
            quantity: wire.quantity,
        })
    }
}

fn validate_fields(user: &str, item: &str, quantity: u32) -> Result<(), ValidationError> {
    if user.trim().is_empty() {
        return Err(ValidationError::EmptyUser);
    }
    if item.trim().is_empty() {
        return Err(ValidationError::EmptyItem);
    }
    if quantity < 1 {
        return Err(ValidationError::ZeroQuantity);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_invalid_fields() {
        assert_eq!(
            Order::create("", "burger", 1).unwrap_err(),
            ValidationError::EmptyUser
        );
        assert_eq!(
            Order::create("david", "   ", 1).unwrap_err(),
            ValidationError::EmptyItem
        );
        assert_eq!(
            Order::create("david", "burger", 0).unwrap_err(),
            ValidationError::ZeroQuantity
        );
    }

    #[test]
    fn test_create_generates_unique_ids() {
        let a = Order::create("david", "chicken burger", 5).unwrap();
        let b = Order::create("david", "chicken burger", 5).unwrap();
        assert_ne!(a.order_id(), b.order_id());
        assert_eq!(a.user(), b.user());
        assert_eq!(a.item(), b.item());
        assert_eq!(a.quantity(), b.quantity());
    }

    #[test]
    fn test_encode_is_canonical() {
        let order = Order {
            order_id: OrderId("id-1".to_string()),
            user: "david".to_string(),
            item: "chicken burger".to_string(),
            quantity: 5,
        };
        let bytes = order.encode().unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"order_id":"id-1","user":"david","item":"chicken burger","quantity":5}"#
        );
    }

    #[test]
    fn test_decode_preserves_wire_id() {
        let order = Order::create("alice", "fries", 2).unwrap();
        let decoded = Order::decode(&order.encode().unwrap()).unwrap();
        assert_eq!(decoded, order);
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        assert!(matches!(
            Order::decode(&[0xff, 0xfe, 0x00]),
            Err(DecodeError::Utf8(_))
        ));
        assert!(matches!(
            Order::decode(b"{not json"),
            Err(DecodeError::Json(_))
        ));
        // Missing `quantity`
        assert!(matches!(
            Order::decode(br#"{"order_id":"x","user":"a","item":"b"}"#),
            Err(DecodeError::Json(_))
        ));
        // Extra field
        assert!(matches!(
            Order::decode(br#"{"order_id":"x","user":"a","item":"b","quantity":1,"note":"hi"}"#),
            Err(DecodeError::Json(_))
        ));
        // Negative and fractional quantities are not positive integers
        assert!(matches!(
            Order::decode(br#"{"order_id":"x","user":"a","item":"b","quantity":-3}"#),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            Order::decode(br#"{"order_id":"x","user":"a","item":"b","quantity":1.5}"#),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            Order::decode(br#"{"order_id":"x","user":"a","item":"b","quantity":0}"#),
            Err(DecodeError::Invalid(ValidationError::ZeroQuantity))
        ));
        assert!(matches!(
            Order::decode(br#"{"order_id":"","user":"a","item":"b","quantity":1}"#),
            Err(DecodeError::Invalid(ValidationError::EmptyOrderId))
        ));
    }
}
