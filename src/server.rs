use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::credentials::TransportContext;
use crate::handlers::Dispatcher;
use crate::protocol::{JsonRpcError, JsonRpcResponse};

/// Maximum bytes per JSON-RPC message (1 MiB).
const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// MCP server that communicates over stdio using newline-delimited JSON-RPC 2.0.
///
/// No authentication layer: the trust boundary is whoever spawned the process.
pub struct StdioServer {
    dispatcher: Dispatcher,
}

impl StdioServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        info!("serving MCP over stdio");
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Process messages from `reader` until EOF, writing responses to `writer`.
    ///
    /// Every line runs on its own task, so a slow tool call never holds up
    /// later messages. Responses are written in completion order.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<(), Box<dyn std::error::Error>>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let transport = TransportContext::default();

        let read = async move {
            let mut raw = Vec::new();
            loop {
                raw.clear();
                let n = reader.read_until(b'\n', &mut raw).await?;
                if n == 0 {
                    break;
                }

                if n > MAX_MESSAGE_BYTES {
                    warn!(bytes = n, limit = MAX_MESSAGE_BYTES, "message too large");
                    let _ = tx.send(JsonRpcResponse::error(None, JsonRpcError::parse_error()));
                    continue;
                }

                let line = match std::str::from_utf8(&raw) {
                    Ok(s) => s.trim().to_string(),
                    Err(_) => {
                        let _ = tx.send(JsonRpcResponse::error(None, JsonRpcError::parse_error()));
                        continue;
                    }
                };
                if line.is_empty() {
                    continue;
                }

                let dispatcher = self.dispatcher.clone();
                let transport = transport.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(resp) = dispatcher.handle_line(&line, &transport).await {
                        let _ = tx.send(resp);
                    }
                });
            }
            info!("stdin closed; draining in-flight requests");
            Ok::<_, Box<dyn std::error::Error>>(())
        };

        let write = async {
            while let Some(resp) = rx.recv().await {
                write_response(&mut writer, &resp).await?;
            }
            Ok::<_, Box<dyn std::error::Error>>(())
        };

        tokio::try_join!(read, write)?;
        info!("all responses written; shutting down");
        Ok(())
    }
}

async fn write_response<W>(writer: &mut W, resp: &JsonRpcResponse) -> Result<(), Box<dyn std::error::Error>>
where
    W: AsyncWrite + Unpin,
{
    let out = serde_json::to_string(resp)?;
    writer.write_all(out.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
