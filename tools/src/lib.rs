//! Tool lifecycle for the Slovo runtime: manifest persistence and
//! approval workflow, sandboxed Docker execution, and discovery of new
//! capabilities from local manifests or remote API descriptors.

pub mod discovery;
pub mod manifest;
pub mod repository;
pub mod sandbox;

pub use discovery::ToolDiscoveryAgent;
pub use manifest::ManifestFile;
pub use repository::ToolRepository;
pub use sandbox::{DockerSandbox, SandboxOutcome};
