//! # Order Stream
//!
//! > **A producer/consumer client pair for order messages over a partitioned log.**
//!
//! The producer turns [`Order`](model::Order)s into JSON, hands them to a broker
//! asynchronously and tracks every send until it is acknowledged. The consumer
//! joins a group, receives partitions, polls them record by record and commits
//! how far it got.
//!
//! ## 🏗️ Design
//!
//! ### Broker as a contract
//! The clients never touch broker storage. They talk to a [`BrokerClient`](broker::BrokerClient),
//! a channel handle that sends [`BrokerRequest`](broker::BrokerRequest)s and awaits oneshot
//! replies. Whatever answers the channel is the broker: the in-process
//! [`BrokerActor`](broker::BrokerActor), or a [`MockBroker`](broker::mock::MockBroker) in tests.
//!
//! ### Delivery tracking
//! Each send resolves exactly once, through a [`DeliveryFuture`](clients::DeliveryFuture)
//! or a callback. [`Producer::flush`](clients::Producer::flush) waits on an in-flight
//! counter kept in a `watch` channel, so no lock is shared with the dispatch task.
//!
//! ### At-least-once consumption
//! An offset is stored only after its record has been returned and processed, and
//! committed later. A crash in between replays the record; nothing is skipped.
//!
//! ### Observability
//! `tracing` everywhere with structured fields. See [`lifecycle::tracing`].
//!
//! ## 🗺️ Module Tour
//!
//! - [`model`]: the `Order` entity and its wire encoding.
//! - [`broker`]: the broker contract, the in-process broker and the mock.
//! - [`clients`]: [`Producer`](clients::Producer) and [`Consumer`](clients::Consumer).
//! - [`config`]: typed configuration with defaults and validation.
//! - [`lifecycle`]: tracing setup, shutdown signal, [`OrderPipeline`](lifecycle::OrderPipeline)
//!   and the `run_producer`/`run_consumer` units.
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! RUST_LOG=info cargo run
//! cargo test
//! ```

pub mod broker;
pub mod clients;
pub mod config;
pub mod lifecycle;
pub mod model;
