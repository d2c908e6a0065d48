use std::{collections::HashSet, net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use server_api::{
    claim_reviewable, current_payload, list_queue, perform_action, release_claim,
    update_reviewable, ApiContext, ReviewableRegistry,
};
use shared::{
    domain::{ReviewableId, TopicId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        topic_for_channel, ClientFrame, CurrentPayloadResponse, PerformRequest, PerformResult,
        ReviewableSummary, ServerFrame, UpdateReviewableRequest, UpdateReviewableResponse,
    },
};
use storage::Storage;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod app_state;
mod config;
mod message_bus;

use app_state::AppState;
use config::{load_settings, prepare_database_url};
use message_bus::MessageBus;

type HttpError = (StatusCode, Json<ApiError>);

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    user_id: Option<i64>,
    topic_id: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let mut registry = ReviewableRegistry::new();
    for (kind, param) in &settings.allowed_params {
        registry.register_param(*kind, param.clone());
    }

    let bus = MessageBus::new(settings.bus_capacity);
    let mut api = ApiContext::new(storage, Arc::new(bus.clone()));
    api.registry = Arc::new(registry);
    api.require_claims = settings.require_claims;

    let state = AppState {
        api,
        bus,
        max_body_bytes: settings.max_body_bytes,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, require_claims = settings.require_claims, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(%error, "failed to listen for shutdown signal");
            }
        })
        .await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/reviewables", get(http_list_queue))
        .route("/reviewables/:reviewable_id", patch(http_update_reviewable))
        .route(
            "/reviewables/:reviewable_id/perform/:action_id",
            put(http_perform_action),
        )
        .route(
            "/reviewables/:reviewable_id/claim",
            post(http_claim).delete(http_release_claim),
        )
        .route(
            "/reviewable/:reviewable_id/current-payload",
            get(http_current_payload),
        )
        .route("/updated-reviewable/:reviewable_id", get(http_current_payload))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden | ErrorCode::InvalidAction => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(error: ApiError) -> HttpError {
    if error.code == ErrorCode::Internal {
        error!(message = %error.message, "request failed");
    }
    (status_for(error.code), Json(error))
}

fn acting_user(user_id: Option<i64>) -> Result<UserId, HttpError> {
    user_id
        .map(UserId)
        .ok_or_else(|| reject(ApiError::new(ErrorCode::Unauthorized, "user_id is required")))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state.api.storage.health_check().await.map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::Internal, e.to_string())),
        )
    })?;
    Ok("ok")
}

async fn http_list_queue(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<ReviewableSummary>>, HttpError> {
    let user_id = acting_user(q.user_id)?;
    let reviewables = list_queue(&state.api, user_id, q.topic_id.map(TopicId))
        .await
        .map_err(reject)?;
    Ok(Json(reviewables))
}

async fn http_update_reviewable(
    State(state): State<Arc<AppState>>,
    Path(reviewable_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<UpdateReviewableRequest>,
) -> Result<Json<UpdateReviewableResponse>, HttpError> {
    let user_id = acting_user(q.user_id)?;
    let updated = update_reviewable(
        &state.api,
        user_id,
        ReviewableId(reviewable_id),
        req.version,
        req.reviewable,
    )
    .await
    .map_err(reject)?;
    Ok(Json(updated))
}

async fn http_perform_action(
    State(state): State<Arc<AppState>>,
    Path((reviewable_id, action_id)): Path<(i64, String)>,
    Query(q): Query<UserQuery>,
    Json(req): Json<PerformRequest>,
) -> Result<(StatusCode, Json<PerformResult>), HttpError> {
    let user_id = acting_user(q.user_id)?;
    let result = perform_action(
        &state.api,
        user_id,
        ReviewableId(reviewable_id),
        req.version,
        &action_id,
        req.extra,
    )
    .await
    .map_err(reject)?;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(result)))
}

async fn http_claim(
    State(state): State<Arc<AppState>>,
    Path(reviewable_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> Result<Json<ReviewableSummary>, HttpError> {
    let user_id = acting_user(q.user_id)?;
    let claimed = claim_reviewable(&state.api, user_id, ReviewableId(reviewable_id))
        .await
        .map_err(reject)?;
    Ok(Json(claimed))
}

async fn http_release_claim(
    State(state): State<Arc<AppState>>,
    Path(reviewable_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let user_id = acting_user(q.user_id)?;
    let released = release_claim(&state.api, user_id, ReviewableId(reviewable_id))
        .await
        .map_err(reject)?;
    Ok(Json(serde_json::json!({ "released": released })))
}

async fn http_current_payload(
    State(state): State<Arc<AppState>>,
    Path(reviewable_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> Result<Json<CurrentPayloadResponse>, HttpError> {
    let user_id = acting_user(q.user_id)?;
    let payload = current_payload(&state.api, user_id, ReviewableId(reviewable_id))
        .await
        .map_err(reject)?;
    Ok(Json(payload))
}

/// Only moderators may open the update stream; the channels carry review
/// queue activity.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Response {
    let user_id = match acting_user(q.user_id) {
        Ok(user_id) => user_id,
        Err(rejection) => return rejection.into_response(),
    };
    let user = match state.api.storage.load_user(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return reject(ApiError::new(ErrorCode::Unauthorized, "unknown user")).into_response()
        }
        Err(e) => {
            return reject(ApiError::new(ErrorCode::Internal, e.to_string())).into_response()
        }
    };
    if !user.moderator {
        return reject(ApiError::new(
            ErrorCode::Forbidden,
            "only moderators may subscribe to review updates",
        ))
        .into_response();
    }
    ws.on_upgrade(move |socket| ws_connection(state, socket, user_id))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, user_id: UserId) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let mut updates = BroadcastStream::new(state.bus.subscribe());
    let mut channels = HashSet::new();
    info!(%connection_id, user_id = user_id.0, "websocket connected");

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let Some(Ok(message)) = incoming else {
                    break;
                };
                let reply = match message {
                    Message::Text(text) => handle_client_frame(&text, &mut channels, connection_id),
                    Message::Close(_) => break,
                    _ => None,
                };
                if let Some(frame) = reply {
                    if send_frame(&mut sender, &frame).await.is_err() {
                        break;
                    }
                }
            }
            update = updates.next() => {
                match update {
                    Some(Ok(message)) => {
                        if !channels.contains(&message.channel) {
                            continue;
                        }
                        if send_frame(&mut sender, &message.into_frame()).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        warn!(%connection_id, skipped, "websocket fell behind; channel messages dropped");
                    }
                    None => break,
                }
            }
        }
    }

    info!(%connection_id, user_id = user_id.0, "websocket disconnected");
}

fn handle_client_frame(
    text: &str,
    channels: &mut HashSet<String>,
    connection_id: Uuid,
) -> Option<ServerFrame> {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            return Some(ServerFrame::Error(ApiError::new(
                ErrorCode::Validation,
                format!("malformed frame: {e}"),
            )))
        }
    };
    match frame {
        ClientFrame::Subscribe { channel } => {
            if topic_for_channel(&channel).is_none() {
                return Some(ServerFrame::Error(ApiError::new(
                    ErrorCode::Validation,
                    format!("unknown channel '{channel}'"),
                )));
            }
            debug!(%connection_id, %channel, "channel subscribed");
            channels.insert(channel.clone());
            Some(ServerFrame::Subscribed { channel })
        }
        ClientFrame::Unsubscribe { channel } => {
            debug!(%connection_id, %channel, "channel unsubscribed");
            channels.remove(&channel);
            Some(ServerFrame::Unsubscribed { channel })
        }
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "failed to encode server frame");
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
