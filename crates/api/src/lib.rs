//! HTTP surface of the herald notification service.

pub mod background;
pub mod routes;
pub mod state;
