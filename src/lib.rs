pub mod config;
pub mod error;
pub mod graph;
pub mod ops;
pub mod persist;

pub use config::Config;
pub use error::{KgmemError, Result};
pub use graph::{Entity, GraphStore, KnowledgeGraph, Relation};
pub use ops::{MemoryService, Operation, OperationOutput, OperationRequest, OperationResponse};
pub use persist::GraphFile;
