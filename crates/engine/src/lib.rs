//! Store, cache and queue seams of the delayed-dispatch pipeline, plus the
//! scheduler and the notification service built on top of them.

pub mod cache;
pub mod memory;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod store;
