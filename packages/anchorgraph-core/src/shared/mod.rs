//! Shared models and ports used by every feature slice.

pub mod models;
pub mod ports;
