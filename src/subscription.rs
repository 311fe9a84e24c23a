//! Dispatch broadcast subscription
//!
//! Maintains the console's WebSocket to the dispatch server and forwards
//! every decoded envelope. Unlike the rover link channels, reconnection here
//! uses capped exponential backoff.

use crate::link::ReconnectPolicy;
use drover_shared::dispatch::BroadcastMessage;
use drover_shared::timing;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Events emitted by the subscription
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// Subscribed to the dispatch server
    Connected,
    /// Subscription dropped; a backoff retry is scheduled
    Disconnected { reason: String },
    /// One broadcast envelope from the server
    Update(BroadcastMessage),
}

/// Handle to the background subscription loop
pub struct DispatchSubscription {
    event_rx: mpsc::Receiver<SubscriptionEvent>,
}

impl DispatchSubscription {
    /// Start subscribing to the given console WebSocket URL
    pub fn start(url: String) -> Self {
        let (event_tx, event_rx) = mpsc::channel::<SubscriptionEvent>(100);
        tokio::spawn(async move {
            subscription_loop(url, event_tx).await;
        });
        Self { event_rx }
    }

    /// Receive the next subscription event
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.event_rx.recv().await
    }
}

async fn subscription_loop(url: String, event_tx: mpsc::Sender<SubscriptionEvent>) {
    let policy = ReconnectPolicy::Backoff {
        initial: Duration::from_millis(timing::DISPATCH_BACKOFF_INITIAL_MS),
        max: Duration::from_millis(timing::DISPATCH_BACKOFF_MAX_MS),
    };
    let mut delay = policy.initial_delay();

    loop {
        if event_tx.is_closed() {
            return;
        }

        match connect_async(url.as_str()).await {
            Ok((mut ws, _)) => {
                delay = policy.initial_delay(); // Reset backoff
                info!("Subscribed to dispatch at {}", url);
                let _ = event_tx.send(SubscriptionEvent::Connected).await;

                let reason = loop {
                    match ws.next().await {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<BroadcastMessage>(&text) {
                                Ok(update) => {
                                    let _ = event_tx.send(SubscriptionEvent::Update(update)).await;
                                }
                                Err(error) => {
                                    debug!("Undecodable dispatch update dropped: {}", error);
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            break "Closed by server".to_string();
                        }
                        Some(Ok(_)) => {}
                        Some(Err(error)) => break error.to_string(),
                    }
                };

                warn!("Dispatch subscription lost: {}", reason);
                let _ = event_tx
                    .send(SubscriptionEvent::Disconnected { reason })
                    .await;
            }
            Err(error) => {
                debug!("Dispatch connect to {} failed: {}", url, error);
            }
        }

        // Wait before reconnecting, then widen the backoff
        tokio::time::sleep(delay).await;
        delay = policy.next_delay(delay);
    }
}
