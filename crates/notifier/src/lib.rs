//! Delivery side of the pipeline: push senders and the dispatch worker pool.

pub mod sender;
pub mod worker;
