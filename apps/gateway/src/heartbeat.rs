// Heartbeat Supervisor: one task per connection. Every tick, if the
// connection answered the previous ping it gets a new one and `isAlive` is
// cleared until the pong comes back; otherwise a miss is counted.
// `maxMissed` consecutive misses closes the connection.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time;

use rooms::Registry;

pub enum HeartbeatOutcome {
    Expired,
}

/// Control messages the supervisor sends to the connection's writer task.
/// Pings are real WebSocket control frames, not app-level JSON — a
/// `Message::Pong` is what resets `isAlive`, mirroring what every
/// off-the-shelf WebSocket client answers automatically.
pub enum WriterCtl {
    Ping,
    Close { code: u16, reason: String },
}

/// Runs until told to stop (via `stop_rx` closing) or the connection is
/// declared dead. `ctl_tx` reaches the connection's writer task, which owns
/// the transport exclusively; the supervisor never writes to the socket
/// itself.
pub async fn run(
    registry: Arc<Registry>,
    client_id: String,
    interval: std::time::Duration,
    max_missed: u32,
    ctl_tx: mpsc::UnboundedSender<WriterCtl>,
    mut stop_rx: mpsc::Receiver<()>,
) -> Option<HeartbeatOutcome> {
    let mut ticker = time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it
    let mut missed = 0u32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match registry.is_alive(&client_id) {
                    None => return None, // connection already gone
                    Some(true) => {
                        registry.set_alive(&client_id, false);
                        missed = 0;
                        if ctl_tx.send(WriterCtl::Ping).is_err() {
                            return Some(HeartbeatOutcome::Expired);
                        }
                    }
                    Some(false) => {
                        missed += 1;
                        if missed >= max_missed {
                            tracing::warn!(client_id = %client_id, missed, "heartbeat expired, terminating connection");
                            return Some(HeartbeatOutcome::Expired);
                        }
                        let _ = ctl_tx.send(WriterCtl::Ping);
                    }
                }
            }
            _ = stop_rx.recv() => return None,
        }
    }
}
