//! Testing utilities and mock implementations.
//!
//! Provides an in-process mock Bus so handlers, the Router, and the
//! Workflow Engine can be exercised without a live broker.

pub mod mock_bus;

pub use mock_bus::{MockBusClient, NoopPublisher, PublishedEnvelope};
