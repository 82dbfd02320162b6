use crate::{Result, TabError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};

use super::protocol::{Request, Response, error_codes};

static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

pub type ClientId = u64;

/// Newline-delimited JSON-RPC over a Unix socket.
pub struct IpcServer {
    socket_path: PathBuf,
    shutdown_tx: broadcast::Sender<()>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            socket_path,
            shutdown_tx,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        UnixListener::bind(&self.socket_path)
            .map_err(|e| TabError::General(format!("Failed to bind socket: {}", e)))
    }

    /// Serves clients until [`IpcServer::shutdown`] is called.
    pub async fn accept<F, Fut>(&self, listener: &UnixListener, on_request: F) -> Result<()>
    where
        F: Fn(ClientId, Request) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = Response> + Send,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let client_id = CLIENT_ID_COUNTER.fetch_add(1, Ordering::SeqCst);
                            let on_request = on_request.clone();
                            tokio::spawn(async move {
                                Self::handle_client(stream, client_id, on_request).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_client<F, Fut>(stream: UnixStream, client_id: ClientId, on_request: F)
    where
        F: Fn(ClientId, Request) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Response> + Send,
    {
        let (read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<String>(64);

        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write_half
                    .write_all(format!("{}\n", msg).as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<Request>(&line) {
                Ok(request) => on_request(client_id, request).await,
                Err(e) => Response::error(
                    0,
                    error_codes::PARSE_ERROR,
                    format!("Parse error: {}", e),
                ),
            };
            match serde_json::to_string(&response) {
                Ok(json) => {
                    if tx.send(json).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to encode response: {}", e),
            }
        }

        drop(tx);
        write_task.await.ok();
        tracing::debug!(client_id, "client disconnected");
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send(()).ok();
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_round_trip_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipc.sock");
        let server = Arc::new(IpcServer::new(path.clone()));
        let listener = server.bind().await.unwrap();

        let serving = server.clone();
        let handle = tokio::spawn(async move {
            serving
                .accept(&listener, |_, request: Request| async move {
                    Response::success(request.id, json!({"echo": request.method}))
                })
                .await
        });

        let stream = UnixStream::connect(&path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"ping\"}\nnot json\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(read_half).lines();
        let first: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.id, 9);
        assert_eq!(first.result, Some(json!({"echo": "ping"})));

        let second: Response =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second.error.unwrap().code, error_codes::PARSE_ERROR);

        server.shutdown();
        handle.await.unwrap().unwrap();
    }
}
