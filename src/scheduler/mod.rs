//! Adaptive poll scheduling for supervised agents.

pub mod backoff;

pub use backoff::{AgentBackoff, BackoffConfig, BackoffRegistry, BackoffStrategy};
