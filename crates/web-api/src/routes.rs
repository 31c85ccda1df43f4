use axum::{
    extract::{State, WebSocketUpgrade},
    http::HeaderMap,
    middleware,
    response::Response,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{
    bandwidth::limit_bandwidth,
    files::{download_file, upload_file},
    identity::user_from_headers,
    state::AppState,
    ws_connection::WebSocketConnection,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chatHub", get(chat_hub))
        .route("/api/files/{name}", get(download_file).post(upload_file))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(state.clone(), limit_bandwidth)),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let registry = state.relay.registry();
    Json(json!({
        "status": "ok",
        "connections": registry.connection_count(),
        "onlineUsers": registry.online_users().len(),
    }))
}

async fn chat_hub(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let user_id = user_from_headers(&headers, &state.identity_header);
    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| async move {
        WebSocketConnection::open(socket, relay, user_id)
            .await
            .run()
            .await;
    })
}
