//! Common types, collaborator traits and configuration loading

pub mod config;
pub mod identity;
pub mod traits;
pub mod types;
