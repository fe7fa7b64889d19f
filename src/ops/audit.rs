//! Operation audit logging.

use std::time::Duration;

use uuid::Uuid;

use crate::error::Result;
use crate::ops::types::OperationOutput;

/// Log one dispatched operation and its outcome under a fresh UUID
/// operation id.
pub fn log_operation(
    operation: &str,
    mutating: bool,
    outcome: &Result<OperationOutput>,
    elapsed: Duration,
) {
    let operation_id = Uuid::new_v4().to_string();
    let elapsed_ms = elapsed.as_millis();

    match outcome {
        Ok(_) => log::info!(
            "operation={} id={} mutating={} success=true elapsed_ms={}",
            operation,
            operation_id,
            mutating,
            elapsed_ms
        ),
        Err(e) if e.is_client_error() => log::info!(
            "operation={} id={} mutating={} success=false kind={} elapsed_ms={}: {}",
            operation,
            operation_id,
            mutating,
            e.kind(),
            elapsed_ms,
            e
        ),
        Err(e) => log::error!(
            "operation={} id={} mutating={} success=false kind={} elapsed_ms={}: {}",
            operation,
            operation_id,
            mutating,
            e.kind(),
            elapsed_ms,
            e
        ),
    }
}
