//! Layered long-term memory for the Slovo runtime.
//!
//! Three stores with one coordinator: Redis for ephemeral session state,
//! Qdrant for encrypted semantic vectors, PostgreSQL for durable
//! structured memory. The retrieval pipeline produces token-budgeted
//! summaries; the writer gates every persisted entry behind verifier
//! approval, confidence and user consent.

pub mod manager;
pub mod postgres_store;
pub mod qdrant_store;
pub mod redis_store;
pub mod retrieval;
pub mod writer;

pub use manager::{MemoryHealth, MemoryManager};
pub use postgres_store::PostgresRepository;
pub use qdrant_store::QdrantRepository;
pub use redis_store::RedisRepository;
pub use retrieval::RetrievalPipeline;
pub use writer::{MemoryWriter, MIN_CONFIDENCE_THRESHOLD};
