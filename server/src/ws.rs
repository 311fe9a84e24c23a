//! WebSocket endpoints for rovers and consoles
//!
//! This module handles:
//! - The rover link: register handshake, progress reports, dispatch push
//! - The console link: fleet snapshot on connect, then broadcast forwarding
//! - Registry cleanup when either side goes away

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use drover_shared::dispatch::{BroadcastMessage, RoverStatus, RoverToDispatch};
use drover_shared::tasking::TaskStatus;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::state::AppState;

pub async fn rover_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_rover(socket, state))
}

pub async fn console_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_console(socket, state))
}

async fn handle_rover(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let Some(status) = await_register(&mut stream).await else {
        return;
    };
    let rover_id = status.id.clone();

    let (tx, mut rx) = mpsc::unbounded_channel();
    state.engine.rover_connected(status, tx).await;

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(message) = outbound else { break };
                if send_json(&mut sink, &message).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_rover_message(&state, &rover_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.engine.rover_disconnected(&rover_id).await;
}

/// The first text frame on a rover socket must be a register message
async fn await_register(stream: &mut SplitStream<WebSocket>) -> Option<RoverStatus> {
    loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => match serde_json::from_str(&text) {
                Ok(RoverToDispatch::Register {
                    rover_id,
                    name,
                    address,
                    video_address,
                }) => {
                    return Some(RoverStatus {
                        id: rover_id,
                        name,
                        address,
                        video_address,
                        connected: true,
                        task_id: None,
                    });
                }
                Ok(other) => {
                    warn!("Rover spoke before registering: {:?}", other);
                    return None;
                }
                Err(error) => {
                    debug!("Undecodable frame before register: {}", error);
                    return None;
                }
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

async fn handle_rover_message(state: &AppState, rover_id: &str, text: &str) {
    let message: RoverToDispatch = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(error) => {
            debug!("Undecodable message from {} dropped: {}", rover_id, error);
            return;
        }
    };

    let result = match message {
        // Duplicate register on a live socket carries nothing new
        RoverToDispatch::Register { .. } => return,
        RoverToDispatch::Progress {
            task_id,
            progress,
            waypoint,
            lap,
        } => {
            state
                .engine
                .report_progress(
                    rover_id,
                    task_id,
                    TaskStatus::Active,
                    Some(progress),
                    Some(waypoint),
                    Some(lap),
                    None,
                )
                .await
        }
        RoverToDispatch::Complete { task_id, laps } => {
            state
                .engine
                .report_progress(
                    rover_id,
                    task_id,
                    TaskStatus::Done,
                    Some(100),
                    None,
                    Some(laps),
                    None,
                )
                .await
        }
        RoverToDispatch::Failed { task_id, error } => {
            state
                .engine
                .report_progress(
                    rover_id,
                    task_id,
                    TaskStatus::Failed,
                    None,
                    None,
                    None,
                    Some(error),
                )
                .await
        }
    };

    if let Err(error) = result {
        debug!("Progress report from {} rejected: {}", rover_id, error);
    }
}

async fn handle_console(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut updates = state.engine.subscribe();

    // Current fleet snapshot before the live stream
    for rover in state.engine.registry().connected().await {
        if send_json(&mut sink, &BroadcastMessage::RoverUpdate { rover })
            .await
            .is_err()
        {
            return;
        }
    }

    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Ok(message) => {
                        if send_json(&mut sink, &message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Console fell behind the broadcast stream, {} updates skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Consoles only listen; anything else is ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn send_json<T: Serialize>(
    sink: &mut SplitSink<WebSocket, Message>,
    message: &T,
) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(text) => sink.send(Message::Text(text)).await,
        Err(error) => {
            warn!("Outbound message did not serialize: {}", error);
            Ok(())
        }
    }
}
