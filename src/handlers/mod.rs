//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `dialogue` - Speech dialogue relay WebSocket

pub mod api;
pub mod dialogue;

pub use dialogue::dialogue_handler;
