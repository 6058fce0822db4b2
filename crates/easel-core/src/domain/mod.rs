//! Domain layer
//!
//! Contains the locking and lifecycle rules plus the audit and event
//! infrastructure they report through.

pub mod audit;
pub mod clock;
pub mod events;
pub mod lifecycle;
pub mod locking;
