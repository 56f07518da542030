use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::commands::{self, CommandContext};
use crate::handler;
use crate::license::{CodeAuthority, LicenseClient};
use crate::onebot::{parse_event, Event, OneBotClient};

pub struct AppState {
    pub host: Arc<OneBotClient>,
    pub authority: Arc<LicenseClient>,
    pub admins: Vec<i64>,
    pub page_delay: Duration,
    pub group_delay: Duration,
}

/// Serves the OneBot event webhook until ctrl-c.
pub async fn run(state: Arc<AppState>, listen: SocketAddr) -> anyhow::Result<()> {
    let app = Router::new().route("/", post(onebot_event)).with_state(state);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("event webhook listening on {}", listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

/// One route for everything the platform reports. Events run on their own
/// tasks so the webhook answers immediately; each invocation is independent
/// and shares nothing mutable with its peers.
async fn onebot_event(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> StatusCode {
    match parse_event(&body) {
        Some(Event::JoinRequest(ev)) => {
            tokio::spawn(async move {
                let authority: Arc<dyn CodeAuthority> = state.authority.clone();
                handler::handle_join_request(state.host.as_ref(), authority, &ev).await;
            });
        }
        Some(Event::Message(ev)) => {
            tokio::spawn(async move {
                let ctx = CommandContext {
                    host: state.host.as_ref(),
                    sink: state.authority.as_ref(),
                    admins: &state.admins,
                    page_delay: state.page_delay,
                    group_delay: state.group_delay,
                };
                commands::handle_message(&ctx, &ev).await;
            });
        }
        None => {}
    }
    StatusCode::NO_CONTENT
}
