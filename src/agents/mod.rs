//! Agent identity, liveness classification, and lifecycle control.

pub mod health;
pub mod lifecycle;
pub mod names;
pub mod state;
