//! Choreography sagas over the transactional outbox.
//!
//! There is no saga table. A saga execution is the set of outbox rows that
//! share a correlation id, stamped onto each row from an explicit
//! [`SagaContext`]. Its status is recomputed from those rows on every read.
//!
//! Compensation is opt-in per [`SagaType`]: a [`CompensationHandler`]
//! registered with the [`SagaCoordinator`] receives the execution snapshot,
//! and the stock [`ExecutorCompensationHandler`] emits one compensation
//! event per processed step through the outbox, most recent first.

pub mod compensation;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod saga_type;
pub mod tracker;

pub use compensation::{
    CompensationAction, CompensationConfig, CompensationDispatcher, CompensationExecutor,
    CompensationStrategy, ExecutorCompensationHandler, OutboxCompensationDispatcher, Selector,
    build_compensation_actions,
};
pub use context::{SagaContext, SagaMetadata};
pub use coordinator::{CompensationHandler, SagaCoordinator};
pub use error::{Result, SagaError};
pub use outbox::SagaStatus;
pub use saga_type::SagaType;
pub use tracker::{SagaExecution, SagaTracker, TimelineEntry};
