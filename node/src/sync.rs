//! Full-sync pulls over TCP.
//!
//! The requester connects, writes one `itemListRequest` message and
//! half-closes the connection. The server answers with one `itemList`
//! message holding every item it knows and closes.

use crate::error::{NodeError, Result};
use crate::records::Direction;
use infodb_engine::{Message, MessageKind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Largest item list accepted from a peer.
pub const MAX_RESPONSE_BYTES: u64 = 16 * 1024 * 1024;

/// Largest request accepted from a peer.
const MAX_REQUEST_BYTES: u64 = 64 * 1024;

/// Builds the serialized item list sent in reply to a request.
pub type ItemListFn = Arc<dyn Fn() -> Result<Vec<u8>> + Send + Sync>;

/// Sees every message body exchanged over a pull connection.
pub type MessageHook = Arc<dyn Fn(Direction, &[u8]) + Send + Sync>;

/// Accept pull requests until `cancel` fires.
pub async fn serve_requests(
    listener: TcpListener,
    item_list: ItemListFn,
    on_message: MessageHook,
    request_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let item_list = item_list.clone();
                    let on_message = on_message.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            result = tokio::time::timeout(
                                request_timeout,
                                handle_request(stream, item_list, on_message),
                            ) => match result {
                                Ok(Ok(bytes)) => {
                                    tracing::debug!(peer = %peer, bytes, "Served item list");
                                }
                                Ok(Err(e)) => {
                                    tracing::warn!(peer = %peer, error = %e, "Pull request failed");
                                }
                                Err(_) => {
                                    tracing::warn!(peer = %peer, "Pull request timed out");
                                }
                            },
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept pull connection");
                }
            },
        }
    }
    tracing::debug!("Pull request service stopped");
}

async fn handle_request(
    mut stream: TcpStream,
    item_list: ItemListFn,
    on_message: MessageHook,
) -> Result<usize> {
    let mut request = Vec::new();
    (&mut stream)
        .take(MAX_REQUEST_BYTES)
        .read_to_end(&mut request)
        .await?;

    let message = Message::from_json(&request)?;
    if message.kind != MessageKind::ItemListRequest {
        return Err(NodeError::Protocol(format!(
            "expected an item list request, got {:?}",
            message.kind
        )));
    }
    on_message(Direction::Received, &request);

    let response = item_list()?;
    stream.write_all(&response).await?;
    stream.shutdown().await?;
    on_message(Direction::Sent, &response);
    Ok(response.len())
}

/// Request the full item list from the node serving pulls at `addr`.
///
/// The whole exchange must complete within `timeout`.
pub async fn pull_items(
    addr: SocketAddr,
    request: &Message,
    timeout: Duration,
    on_message: &(dyn Fn(Direction, &[u8]) + Sync),
) -> Result<Message> {
    let body = request.to_json()?;
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(&body).await?;
        stream.shutdown().await?;
        on_message(Direction::Sent, &body);

        let mut response = Vec::new();
        (&mut stream)
            .take(MAX_RESPONSE_BYTES + 1)
            .read_to_end(&mut response)
            .await?;
        if response.len() as u64 > MAX_RESPONSE_BYTES {
            return Err(NodeError::Protocol(format!(
                "item list from {addr} exceeds {MAX_RESPONSE_BYTES} bytes"
            )));
        }

        let message = Message::from_json(&response)?;
        if message.kind != MessageKind::ItemList {
            return Err(NodeError::Protocol(format!(
                "expected an item list, got {:?}",
                message.kind
            )));
        }
        on_message(Direction::Received, &response);
        Ok::<_, NodeError>(message)
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| NodeError::Timeout(timeout))?
}
