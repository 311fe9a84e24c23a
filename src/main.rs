mod api;
mod link;
mod subscription;
mod view;

use api::{DispatchApi, TaskQuery};
use clap::Parser;
use drover_shared::dispatch::BroadcastMessage;
use drover_shared::{CommandFrame, Mode};
use link::{LinkSession, SessionConfig, SessionEvent, WsLinkConnector};
use subscription::{DispatchSubscription, SubscriptionEvent};
use view::FleetView;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Operator console for a Drover fleet
#[derive(Parser, Debug)]
#[command(name = "operator-console")]
struct Args {
    /// Dispatch server base URL
    #[arg(long, default_value = "http://127.0.0.1:4890")]
    server: String,

    /// Rover to hold a direct control link to whenever it is online
    #[arg(long)]
    rover: Option<String>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    info!("Operator console starting");
    info!("  Dispatch server: {}", args.server);

    let api = DispatchApi::new(&args.server);
    let mut view = FleetView::default();
    seed_view(&api, &mut view).await;

    let mut subscription = DispatchSubscription::start(ws_url(&args.server, "/ws/console"));

    let mut command_link: Option<LinkSession> = None;
    let mut video_link: Option<LinkSession> = None;

    // Main event loop
    loop {
        maybe_open_links(
            args.rover.as_deref(),
            &view,
            &mut command_link,
            &mut video_link,
        );

        tokio::select! {
            event = subscription.recv() => match event {
                Some(SubscriptionEvent::Connected) => {
                    info!("Dispatch subscription established");
                }
                Some(SubscriptionEvent::Disconnected { reason }) => {
                    warn!("Dispatch subscription lost: {}", reason);
                }
                Some(SubscriptionEvent::Update(update)) => {
                    handle_update(
                        update,
                        &mut view,
                        args.rover.as_deref(),
                        &mut command_link,
                        &mut video_link,
                    );
                }
                None => {
                    error!("Dispatch subscription closed");
                    break;
                }
            },
            Some(event) = next_session_event(&mut command_link) => {
                handle_link_event(event, command_link.as_ref());
            }
            Some(event) = next_session_event(&mut video_link) => match event {
                SessionEvent::Connected => info!("Video link up"),
                SessionEvent::Disconnected { reason } => debug!("Video link down: {}", reason),
                SessionEvent::Telemetry(_) => {}
            },
        }
    }
}

/// Seed the fleet view from the authoritative API before broadcasts arrive
async fn seed_view(api: &DispatchApi, view: &mut FleetView) {
    match api.list_zones().await {
        Ok(zones) => view.zones = zones,
        Err(error) => warn!("Zone fetch failed: {}", error),
    }
    match api.list_missions().await {
        Ok(missions) => view.missions = missions,
        Err(error) => warn!("Mission fetch failed: {}", error),
    }
    match api.list_tasks(&TaskQuery::default()).await {
        Ok(tasks) => view.tasks = tasks,
        Err(error) => warn!("Task fetch failed: {}", error),
    }
    match api.list_rovers().await {
        Ok(rovers) => view.rovers = rovers,
        Err(error) => warn!("Rover fetch failed: {}", error),
    }
    info!(
        "Fleet view seeded: {} zones, {} missions, {} tasks, {} rovers",
        view.zones.len(),
        view.missions.len(),
        view.tasks.len(),
        view.rovers.len()
    );
}

/// Keep link sessions open to the selected rover while it is registered
fn maybe_open_links(
    target: Option<&str>,
    view: &FleetView,
    command_link: &mut Option<LinkSession>,
    video_link: &mut Option<LinkSession>,
) {
    let rover_id = match target {
        Some(id) => id,
        None => return,
    };
    if command_link.is_some() {
        return;
    }
    let rover = match view.rover(rover_id) {
        Some(rover) => rover,
        None => return,
    };

    info!("Opening control link to {} at {}", rover.id, rover.address);
    *command_link = Some(LinkSession::open(
        SessionConfig::command(rover.id.clone(), rover.address.clone()),
        WsLinkConnector::command(rover.address.clone()),
    ));
    *video_link = Some(LinkSession::open(
        SessionConfig::video(rover.id.clone(), rover.video_address.clone()),
        WsLinkConnector::video(rover.video_address.clone()),
    ));
}

fn handle_update(
    update: BroadcastMessage,
    view: &mut FleetView,
    target: Option<&str>,
    command_link: &mut Option<LinkSession>,
    video_link: &mut Option<LinkSession>,
) {
    match &update {
        BroadcastMessage::TaskUpdate { task } => {
            info!(
                "Task {}: {} {}% (waypoint {}, lap {})",
                task.id, task.status, task.progress, task.waypoint, task.lap
            );
        }
        BroadcastMessage::RoverUpdate { rover } if !rover.connected => {
            // The registry is authoritative: stop chasing a rover it dropped
            if target == Some(rover.id.as_str()) {
                if let Some(session) = command_link.take() {
                    info!("Rover {} left the fleet; releasing control link", rover.id);
                    session.release();
                }
                if let Some(session) = video_link.take() {
                    session.release();
                }
            }
        }
        BroadcastMessage::RoverUpdate { rover } => {
            info!("Rover online: {} at {}", rover.id, rover.address);
        }
        BroadcastMessage::ZoneUpdate { zone } => debug!("Zone updated: {}", zone.name),
        BroadcastMessage::MissionUpdate { mission } => debug!("Mission updated: {}", mission.name),
        BroadcastMessage::Unknown => {}
    }
    view.apply(update);
}

fn handle_link_event(event: SessionEvent, link: Option<&LinkSession>) {
    match event {
        SessionEvent::Connected => {
            info!("Control link up");
            // Hand the rover to the operator as soon as we own the link
            if let Some(session) = link {
                session.send_frame(CommandFrame::SetMode(Mode::Teleop));
            }
        }
        SessionEvent::Disconnected { reason } => {
            warn!("Control link down: {}", reason);
        }
        SessionEvent::Telemetry(telemetry) => {
            if let Some(session) = link {
                debug!(
                    "Telemetry: mode {:?} battery {:.1}V latency {}ms",
                    telemetry.mode,
                    telemetry.battery_voltage,
                    session.latency_ms()
                );
            }
        }
    }
}

async fn next_session_event(link: &mut Option<LinkSession>) -> Option<SessionEvent> {
    match link.as_mut() {
        Some(session) => session.recv().await,
        None => std::future::pending().await,
    }
}

/// Derive a WebSocket endpoint from the HTTP base URL
fn ws_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}{}", rest, path)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}{}", rest, path)
    } else {
        format!("{}{}", base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_swaps_scheme() {
        assert_eq!(
            ws_url("http://127.0.0.1:4890/", "/ws/console"),
            "ws://127.0.0.1:4890/ws/console"
        );
        assert_eq!(
            ws_url("https://dispatch.example.com", "/ws/console"),
            "wss://dispatch.example.com/ws/console"
        );
    }
}
