//! Terminal client for the shelf service.

pub mod client;
pub mod dashboard;
pub mod session;
