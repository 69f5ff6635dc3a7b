//! Shared domain types for the Resonant order-fulfillment core.
//!
//! Pure data and pure logic only: entity structs, status enums, the actor
//! identity carried into the audit trail, the error taxonomy, and the
//! service-request phase machine. No IO, no store access.

mod actor;
mod error;
mod phase;
mod types;

pub use actor::{Actor, ActorContext};
pub use error::{DomainError, DomainResult};
pub use phase::{allowed, phase_of, Phase, SrSnapshot, Transition, TransitionError};
pub use types::*;
