// Public API for integration tests and potential library usage

pub mod agents;
pub mod error;
pub mod llm;
pub mod moderation;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod types;
pub mod ws;
