//! Slovo core: configuration, data model, encryption and language-model
//! integration shared by every other crate in the workspace.

pub mod config;
pub mod encryption;
pub mod llm;
pub mod models;

pub use config::{ProviderChoice, Settings};
pub use encryption::{EncryptionError, EncryptionService};
