//! Paloma: scheduled companion messaging for a single faraway contact.

pub mod channels;
pub mod config;
pub mod error;
pub mod generator;
pub mod orchestrator;
pub mod scheduler;
pub mod speech;
pub mod store;
pub mod validator;
