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
use std::sync::Arc;

use campus_msg::{decode_inbound, read_frame, write_frame, BrokerState, Command, Inbound, Reply};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::standby::StandbyCore;
use crate::supervisor::{FailoverReason, FailoverState};

/// Accept loop for the standby control endpoint.
pub(crate) async fn serve_control(
    listener: TcpListener,
    core: Arc<StandbyCore>,
    max_frame_bytes: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                let core = Arc::clone(&core);
                let shutdown = shutdown.resubscribe();
                tokio::spawn(control_connection(stream, peer, core, max_frame_bytes, shutdown));
            }
            Err(err) => warn!(error = %err, "control accept failed"),
        }
    }
    debug!("control endpoint stopped");
}

async fn control_connection(
    stream: TcpStream,
    peer: SocketAddr,
    core: Arc<StandbyCore>,
    max_frame_bytes: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut stream = BufReader::new(stream);
    loop {
        let frame = tokio::select! {
            _ = shutdown.recv() => break,
            frame = read_frame(&mut stream, max_frame_bytes) => frame,
        };
        let raw = match frame {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(err) => {
                debug!(%peer, error = %err, "control read failed");
                break;
            }
        };
        let reply = match decode_inbound(&raw) {
            Ok(Inbound::Command(Command::Ping)) => Reply::state(match core.state() {
                FailoverState::Passive => BrokerState::Passive,
                FailoverState::Active => BrokerState::Active,
            }),
            Ok(Inbound::Command(Command::Activate)) => {
                info!(%peer, "activation requested");
                match core.activate(FailoverReason::Manual).await {
                    Ok(_) => Reply::state(BrokerState::Activated),
                    Err(err) => {
                        error!(error = %err, "activation failed");
                        Reply::error(format!("activation failed: {err:#}"))
                    }
                }
            }
            Ok(_) => Reply::error("control endpoint accepts only ping and activate"),
            Err(err) => Reply::error(err.to_string()),
        };
        if write_frame(stream.get_mut(), &reply).await.is_err() {
            break;
        }
    }
}
