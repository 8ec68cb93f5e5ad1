//! Order intake and stock reservation.
//!
//! This crate provides:
//! - [`OrderIntake`]: validates and prices an order, persists it as
//!   `pending`, and publishes its reservation message
//! - [`ReservationWorker`]: consumes reservation messages, reserves stock
//!   all-or-nothing, and retries or dead-letters failed attempts
//! - [`WorkerPool`]: runs several consumers with graceful shutdown
//! - [`PendingOrderSweep`]: republishes orders whose message was never sent

pub mod error;
pub mod intake;
pub mod pool;
pub mod retry;
pub mod sweep;
pub mod worker;

pub use error::{IntakeError, ReservationError, Result, StoreError};
pub use intake::OrderIntake;
pub use pool::WorkerPool;
pub use retry::RetryPolicy;
pub use sweep::PendingOrderSweep;
pub use worker::{Outcome, ReservationWorker};
