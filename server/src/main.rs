use axum::{routing::get, Router};
use std::{net::SocketAddr, sync::Arc};

use config::Config;
use judge::{HttpJudge, JudgeClient, MockJudge};
use room_manager::AppState;
use store::{MemoryStore, SqliteStore, Store};
use toron_core::clock::SystemClock;
use ws::ws_handler;

mod config;
mod judge;
mod room_manager;
mod store;
mod ws;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let store = SqliteStore::connect(url)
                .await
                .expect("failed to open database");
            tracing::info!(%url, "using sqlite store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let judge: Arc<dyn JudgeClient> = match &config.judge_api_key {
        Some(api_key) => Arc::new(HttpJudge::new(
            &config.judge_base_url,
            api_key,
            &config.judge_model,
        )),
        None => {
            tracing::warn!("JUDGE_API_KEY not set, using canned judge");
            Arc::new(MockJudge::new())
        }
    };

    let port = config.port;
    let state = Arc::new(AppState::new(
        config,
        store,
        judge,
        Arc::new(SystemClock::new()),
    ));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
