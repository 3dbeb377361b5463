//! The broker contract and the brokers that implement it.
//!
//! The clients only ever see a [`BrokerClient`]. Behind it sits one of:
//!
//! - [`BrokerActor`] - an in-process broker with real offsets, groups and
//!   committed positions
//! - [`mock::MockBroker`] - a scripted broker for failure tests

pub mod actor;
pub mod client;
pub mod error;
pub mod message;
pub mod mock;
pub mod record;

pub use actor::BrokerActor;
pub use client::BrokerClient;
pub use error::{BrokerError, RecordError};
pub use message::{BrokerRequest, Response};
pub use record::*;
