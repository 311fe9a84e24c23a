mod engine;
mod http;
mod registry;
mod state;
mod store;
mod ws;

use axum::routing::{get, post, put};
use axum::Router;
use state::AppState;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_PORT: u16 = 4890;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let state = AppState::new();
    let app = Router::new()
        .route("/health", get(http::health))
        .route("/zones", get(http::list_zones).post(http::create_zone))
        .route("/zones/:id", put(http::update_zone).delete(http::delete_zone))
        .route("/missions", get(http::list_missions).post(http::create_mission))
        .route(
            "/missions/:id",
            put(http::update_mission).delete(http::delete_mission),
        )
        .route("/missions/:id/start", post(http::start_mission))
        .route("/missions/:id/stop", post(http::stop_mission))
        .route("/tasks", get(http::list_tasks))
        .route("/tasks/:id/cancel", post(http::cancel_task))
        .route("/rovers", get(http::list_rovers))
        .route("/ws/rover", get(ws::rover_ws))
        .route("/ws/console", get(ws::console_ws))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Dispatch server listening on :{}", port);
    axum::serve(listener, app).await?;

    Ok(())
}
