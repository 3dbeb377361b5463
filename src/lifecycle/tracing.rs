//! # Observability & Tracing
//!
//! [`setup_tracing`] installs a compact `tracing-subscriber` formatter filtered by
//! `RUST_LOG`. Module paths are hidden (`with_target(false)`); the structured
//! fields (`topic`, `partition`, `offset`, `order_id`, `group`) carry the context.
//!
//! ## Levels
//!
//! | Level | What |
//! |-------|------|
//! | `info` | startup, shutdown, joins, assignments, received orders |
//! | `debug` | every enqueue, delivery, fetch and commit |
//! | `warn` | skipped records, handler failures, broker outages, timeouts |
//!
//! ```bash
//! RUST_LOG=info cargo run
//! RUST_LOG=order_stream::clients=debug cargo run
//! ```
//!
//! With `RUST_LOG=info` the demo prints something like:
//!
//! ```text
//! INFO Broker started partitions=1 session_timeout_ms=45000
//! INFO producer: Producer started buffer=1024
//! INFO consumer:subscribe: Joined group member=member-1 topics=["orders"]
//! INFO consumer:run:poll: Assignment applied generation=1 partitions=[TopicPartition { topic: "orders", partition: 0 }] revoked=0
//! INFO consumer:run: Order received order_id=8f0c... user="david" item="chicken burger" quantity=5 partition=0 offset=0
//! ```

/// Installs the global subscriber. Call once, at program start.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
