//! The five reasoning agents and the orchestrator that sequences them.
//!
//! Every agent takes typed input and returns typed output; the heavy
//! reasoning can route through a language model with a structured output
//! schema, and every agent carries a deterministic fallback for when no
//! model is configured.

pub mod executor;
pub mod explainer;
pub mod intent;
pub mod orchestrator;
pub mod planner;
pub mod verifier;

pub use executor::ExecutorAgent;
pub use explainer::ExplainerAgent;
pub use intent::IntentAgent;
pub use orchestrator::Orchestrator;
pub use planner::PlannerAgent;
pub use verifier::VerifierAgent;
