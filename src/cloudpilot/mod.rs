// src/cloudpilot/mod.rs

pub mod agent;
pub mod clients;
pub mod clouds;
pub mod config;
pub mod documents;
pub mod provider;
pub mod server;
pub mod tool_protocol;
pub mod tools;

pub use agent::Agent;
pub use clouds::CloudRegistry;
pub use documents::DocumentStore;
