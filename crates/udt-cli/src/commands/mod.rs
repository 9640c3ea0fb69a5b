//! Command handlers

pub mod config;
pub mod dataset;
pub mod status;
pub mod watch;
