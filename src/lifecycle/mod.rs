//! Process-level wiring: tracing setup, shutdown signal, the in-process
//! pipeline and the producer/consumer run units.

pub mod pipeline;
pub mod shutdown;
pub mod tracing;

pub use pipeline::{run_consumer, run_producer, OrderPipeline, RunError};
pub use shutdown::{on_ctrl_c, Shutdown, ShutdownTrigger};
pub use self::tracing::setup_tracing;
