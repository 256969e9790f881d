//! ---
//! campus_section: "02-messaging-ipc-data-model"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Message schema helpers and protocol codecs."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::net::SocketAddr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::framing::{read_frame, write_frame, DEFAULT_MAX_FRAME_BYTES};
use crate::types::{CommandMessage, StateReply};
use crate::{MessagingError, Result};

/// Request/reply channel to a single broker endpoint.
///
/// After any failed exchange the connection must be discarded: a late reply
/// would otherwise be read as the answer to the next request.
#[derive(Debug)]
pub struct Connection {
    endpoint: SocketAddr,
    stream: BufReader<TcpStream>,
    max_frame_bytes: usize,
}

impl Connection {
    /// Open a connection, failing with [`MessagingError::Timeout`] after `connect_timeout`.
    pub async fn connect(endpoint: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        let stream = match timeout(connect_timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(MessagingError::Connection(err)),
            Err(_) => return Err(MessagingError::Timeout(connect_timeout)),
        };
        stream.set_nodelay(true)?;
        trace!(%endpoint, "connection established");
        Ok(Self {
            endpoint,
            stream: BufReader::new(stream),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        })
    }

    /// Override the largest reply frame accepted.
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Address this connection talks to.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Send one frame and wait up to `deadline` for the reply frame.
    pub async fn request<T, R>(&mut self, message: &T, deadline: Duration) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let max_frame_bytes = self.max_frame_bytes;
        let exchange = async {
            write_frame(self.stream.get_mut(), message).await?;
            read_frame(&mut self.stream, max_frame_bytes)
                .await?
                .ok_or(MessagingError::Closed)
        };
        let raw = match timeout(deadline, exchange).await {
            Ok(result) => result?,
            Err(_) => return Err(MessagingError::Timeout(deadline)),
        };
        serde_json::from_str(&raw).map_err(|err| {
            MessagingError::Protocol(format!("unexpected reply from {}: {err}", self.endpoint))
        })
    }
}

/// One-shot liveness probe: connect, send `ping`, and wait for the state reply,
/// all within `deadline`.
pub async fn ping(endpoint: SocketAddr, deadline: Duration) -> Result<StateReply> {
    let attempt = async {
        let mut connection = Connection::connect(endpoint, deadline).await?;
        connection.request(&CommandMessage::PING, deadline).await
    };
    match timeout(deadline, attempt).await {
        Ok(result) => result,
        Err(_) => Err(MessagingError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BrokerState, Reply};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn spawn_responder(reply: Option<&'static str>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut stream = BufReader::new(stream);
                    let mut line = String::new();
                    while stream.read_line(&mut line).await.unwrap_or(0) > 0 {
                        if let Some(reply) = reply {
                            let _ = stream.get_mut().write_all(reply.as_bytes()).await;
                        }
                        line.clear();
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn ping_reads_state_reply() {
        let addr = spawn_responder(Some("{\"state\":\"active\"}\n")).await;
        let reply = ping(addr, Duration::from_millis(500)).await.unwrap();
        assert_eq!(reply.state, BrokerState::Active);
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let addr = spawn_responder(None).await;
        let mut connection = Connection::connect(addr, Duration::from_millis(200))
            .await
            .unwrap();
        let err = connection
            .request::<_, Reply>(&CommandMessage::PING, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = ping(addr, Duration::from_millis(200)).await.unwrap_err();
        assert!(err.is_transport() || err.is_timeout());
    }
}
