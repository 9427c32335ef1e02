use futures::SinkExt;
use tokio::sync::broadcast;
use tokio::time::{Duration, sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

const BUS_CAPACITY: usize = 256;

/// Event bus for the human-readable `[ROLE port] ...` lines every component
/// emits. `emit` prints to stdout (the always-on sink) and fans the line out
/// to subscribers; the optional WebSocket sink forwards each line to an
/// external log server.
#[derive(Clone)]
pub struct Logs {
    bus: broadcast::Sender<String>,
}

impl Default for Logs {
    fn default() -> Self {
        Self::new()
    }
}

impl Logs {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self { bus }
    }

    pub fn emit(&self, line: impl Into<String>) {
        let line = line.into();
        println!("{}", line);
        // No subscribers is fine; stdout already has the line.
        let _ = self.bus.send(line);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.bus.subscribe()
    }

    /// Forward every bus line to a WebSocket log sink as a small JSON event.
    /// Reconnects with a flat backoff until shutdown; a sink outage never
    /// affects the emitting node.
    pub fn spawn_ws_forwarder(&self, sink_addr: String, shutdown: CancellationToken) {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            let url = format!("ws://{}", sink_addr);
            loop {
                if shutdown.is_cancelled() {
                    break;
                }
                let Ok((mut ws, _)) = connect_async(url.as_str()).await else {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(Duration::from_secs(5)) => continue,
                    }
                };
                loop {
                    let line = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        line = rx.recv() => match line {
                            Ok(line) => line,
                            // Fell behind; skip to the live edge.
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => return,
                        },
                    };
                    let event = serde_json::json!({
                        "timestamp": chrono::Utc::now().format("%H:%M:%S%.3f").to_string(),
                        "message": line,
                    });
                    if ws.send(Message::Text(event.to_string())).await.is_err() {
                        break; // reconnect
                    }
                }
            }
        });
    }
}
