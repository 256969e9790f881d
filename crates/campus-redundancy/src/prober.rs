//! ---
//! campus_section: "07-resilience-fault-tolerance"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Redundancy planning and failover coordinators."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::net::SocketAddr;
use std::time::Duration;

use campus_msg::{CommandMessage, Connection, MessagingError, StateReply};
use tokio::time::timeout;
use tracing::debug;

/// Liveness prober for one endpoint.
///
/// The probe connection is reused while it works. Any failure discards it, so
/// the next probe starts from a fresh socket.
#[derive(Debug)]
pub struct PrimaryProber {
    endpoint: SocketAddr,
    timeout: Duration,
    connection: Option<Connection>,
    reconnects: u64,
}

impl PrimaryProber {
    pub fn new(endpoint: SocketAddr, timeout: Duration) -> Self {
        Self {
            endpoint,
            timeout,
            connection: None,
            reconnects: 0,
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Sockets opened so far, the first one included.
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Send one ping. Timeouts and transport errors are both failures.
    ///
    /// The deadline covers the whole probe, connecting included.
    pub async fn probe(&mut self) -> Result<StateReply, MessagingError> {
        let reused = self.connection.take();
        if reused.is_none() {
            self.reconnects += 1;
        }
        let (endpoint, deadline) = (self.endpoint, self.timeout);
        let attempt = async move {
            let mut connection = match reused {
                Some(connection) => connection,
                None => Connection::connect(endpoint, deadline).await?,
            };
            let reply = connection
                .request::<_, StateReply>(&CommandMessage::PING, deadline)
                .await?;
            Ok::<_, MessagingError>((connection, reply))
        };
        let outcome = match timeout(deadline, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => Err(MessagingError::Timeout(deadline)),
        };
        match outcome {
            Ok((connection, reply)) => {
                self.connection = Some(connection);
                Ok(reply)
            }
            Err(err) => {
                debug!(endpoint = %self.endpoint, error = %err, "probe failed; socket discarded");
                Err(err)
            }
        }
    }
}
