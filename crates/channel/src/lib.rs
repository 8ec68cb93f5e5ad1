//! Reservation channel for the order pipeline.
//!
//! Intake publishes one [`ReservationMessage`] per persisted order; reservation
//! workers consume them with at-least-once delivery. Every delivery must be
//! settled with `ack`, `nack` (redeliver later) or `reject` (dead-letter).

pub mod channel;
pub mod error;
pub mod memory;
pub mod message;
pub mod postgres;

pub use channel::{AckHandle, DeadLetter, Delivery, DeliveryStream, ReservationChannel};
pub use error::{ChannelError, Result};
pub use memory::InMemoryChannel;
pub use message::{ReservationMessage, SCHEMA_VERSION};
pub use postgres::{PostgresChannel, PostgresChannelOptions};
