pub mod api;
pub mod dialogue;
