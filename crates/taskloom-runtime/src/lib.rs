//! Agent run execution for Taskloom.
//!
//! Owns the run lifecycle state machine, retry and timeout policy, error
//! classification, the per-dependency circuit breaker, the agent registry,
//! and the executor that ties them together against a [`store::RunStore`].

pub mod audit;
pub mod circuit_breaker;
pub mod classify;
pub mod executor;
pub mod lifecycle;
pub mod observer;
pub mod registry;
pub mod retry;
pub mod store;
