pub mod audit;
pub mod router;
pub mod server;
pub mod types;

pub use router::MemoryService;
pub use server::StdioServer;
pub use types::{Operation, OperationOutput, OperationRequest, OperationResponse};
