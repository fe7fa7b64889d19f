use crate::error::{KgmemError, Result};
use crate::ops::router::MemoryService;
use crate::ops::types::{OperationRequest, OperationResponse};
use std::path::PathBuf;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader as AsyncBufReader,
};

/// Line-delimited JSON server: one request per line in, one response per line out.
pub struct StdioServer {
    service: MemoryService,
}

impl StdioServer {
    pub fn new(service: MemoryService) -> Self {
        Self { service }
    }

    /// Run the server (reads from stdin, writes to stdout)
    pub async fn run(&self) -> Result<()> {
        log::info!("kgmem server v{} starting on stdio", env!("CARGO_PKG_VERSION"));
        let stdin = AsyncBufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        self.serve(stdin, &mut stdout).await?;
        log::info!("kgmem server shutting down");
        Ok(())
    }

    /// Serve requests from any line reader until EOF.
    pub async fn serve<R, W>(&self, mut reader: R, writer: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| KgmemError::storage(PathBuf::from("<stdin>"), e))?;

            // EOF - client disconnected
            if bytes_read == 0 {
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<OperationRequest>(trimmed) {
                Ok(request) => self.service.handle(request).await,
                Err(e) => {
                    log::warn!("Malformed request line: {}", e);
                    let message = format!("malformed request: {}", e);
                    let err = KgmemError::invalid_params("<request>", message);
                    OperationResponse::failure(&err, None)
                }
            };

            send_response(writer, &response).await?;
        }
        Ok(())
    }
}

async fn send_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &OperationResponse,
) -> Result<()> {
    let to_io = |e: std::io::Error| KgmemError::storage(PathBuf::from("<stdout>"), e);
    let mut body = serde_json::to_vec(response)
        .map_err(|e| to_io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    body.push(b'\n');
    writer.write_all(&body).await.map_err(to_io)?;
    writer.flush().await.map_err(to_io)
}
