//! HTTP surface for the Slovo runtime: chat, conversation history and the
//! memory inspector, served by axum under a versioned path prefix.

pub mod handlers;
pub mod models;
pub mod server;

pub use handlers::ApiState;
pub use server::ApiServer;
