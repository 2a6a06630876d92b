//! Real-time seat channel.
//!
//! # Protocol
//!
//! ```text
//! ws://localhost:8080/ws/showtimes/:id?user_id=<uuid>
//! ```
//!
//! On connect the server sends a `resync` message with the full seat map,
//! then forwards every seat notification of the showtime in sequence order:
//!
//! ```json
//! { "type": "seatBooked", "showtime_id": "…", "sequence": 42,
//!   "seat_ids": ["A1"], "user_id": "…", "expires_at": "…" }
//! ```
//!
//! Clients may send hold commands over the same connection:
//!
//! ```json
//! { "type": "reserveSeats", "showtime_id": "…", "user_id": "…", "seat_ids": ["A1", "A2"] }
//! { "type": "modifySeats", "add": ["A3"], "remove": ["A1"] }
//! { "type": "cancelReservation", "seat_ids": [] }
//! ```
//!
//! and get a `reserveResult` or `cancelResult` reply. A subscriber that falls
//! behind the bus buffer receives a fresh `resync` instead of the missed
//! deltas. Closing the connection never releases a hold.

#![allow(clippy::cognitive_complexity)] // select! loops

use crate::error::AppError;
use crate::server::state::AppState;
use axum::{
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, stream::SplitSink, stream::StreamExt};
use marquee_core::ErrorCode;
use marquee_core::types::{ReservationSession, SeatId, SessionId, ShowtimeId, UserId};
use marquee_engine::{HoldError, SeatMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, broadcast::error::RecvError};
use tokio::time::{Instant, interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// Message Types
// ============================================================================

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Claim exactly these seats
    ReserveSeats {
        /// Seats wanted
        seat_ids: Vec<SeatId>,
        /// Must match the connection's showtime when given
        #[serde(default)]
        showtime_id: Option<ShowtimeId>,
        /// Defaults to the connection's user
        #[serde(default)]
        user_id: Option<UserId>,
    },
    /// Add and remove seats on the live session
    ModifySeats {
        /// Seats to add
        #[serde(default)]
        add: Vec<SeatId>,
        /// Seats to drop
        #[serde(default)]
        remove: Vec<SeatId>,
        /// Defaults to the connection's user
        #[serde(default)]
        user_id: Option<UserId>,
    },
    /// Drop the listed seats, or the whole session when the list is empty
    CancelReservation {
        /// Seats to drop
        #[serde(default)]
        seat_ids: Vec<SeatId>,
        /// Must match the connection's showtime when given
        #[serde(default)]
        showtime_id: Option<ShowtimeId>,
        /// Defaults to the connection's user
        #[serde(default)]
        user_id: Option<UserId>,
    },
    /// Application-level keep-alive
    Ping,
    /// Answer to a server ping
    Pong,
}

/// Messages sent by the server besides forwarded seat notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Outcome of `reserveSeats` or `modifySeats`
    ReserveResult {
        /// Whether the command was applied
        success: bool,
        /// Live session after the command
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Seats held after the command
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        seat_ids: Vec<SeatId>,
        /// Shared expiry of the held seats
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
        /// Failure message
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        /// Failure code
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
        /// Seats another user holds or bought
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        conflicting_seat_ids: Vec<SeatId>,
    },
    /// Outcome of `cancelReservation`
    CancelResult {
        /// Whether the command was applied
        success: bool,
        /// Seats that became free
        released: Vec<SeatId>,
        /// Failure message
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Full seat map; replaces whatever the client mirrored
    Resync {
        /// Snapshot
        seat_map: SeatMap,
    },
    /// Protocol error
    Error {
        /// Code
        code: ErrorCode,
        /// Message
        message: String,
    },
    /// Keep-alive
    Ping,
    /// Answer to a client ping
    Pong,
}

impl ServerMessage {
    fn held(session: Option<&ReservationSession>) -> Self {
        Self::ReserveResult {
            success: true,
            session_id: session.map(|s| s.session_id),
            seat_ids: session.map(ReservationSession::seat_list).unwrap_or_default(),
            expires_at: session.map(|s| s.expires_at),
            message: None,
            code: None,
            conflicting_seat_ids: Vec::new(),
        }
    }

    fn rejected(error: &HoldError) -> Self {
        Self::ReserveResult {
            success: false,
            session_id: None,
            seat_ids: Vec::new(),
            expires_at: None,
            message: Some(error.to_string()),
            code: Some(error.code()),
            conflicting_seat_ids: error.seat_ids().to_vec(),
        }
    }

    fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

// ============================================================================
// Handler
// ============================================================================

/// Connecting user.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    /// Used for commands without their own `user_id` and for `mine` flags
    pub user_id: Option<Uuid>,
}

/// Upgrade to the seat channel of a showtime.
///
/// Answers 404 for unknown showtimes and 503 once the connection limit is
/// reached.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(showtime_id): Path<Uuid>,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> Response {
    let current = state.ws_connections.load(Ordering::Relaxed);
    if current >= state.websocket.max_connections {
        warn!(
            current_connections = current,
            "WebSocket connection limit exceeded"
        );
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Too many concurrent connections. Please try again later.",
        )
            .into_response();
    }

    let showtime_id = ShowtimeId::from_uuid(showtime_id);
    if let Err(e) = state.holds.seat_map(showtime_id, None).await {
        return AppError::from(e).into_response();
    }

    let user_id = query.user_id.map(UserId::from_uuid);
    ws.on_upgrade(move |socket| handle_socket(socket, showtime_id, user_id, state))
}

// ============================================================================
// Socket
// ============================================================================

type Sender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Decrements the connection count when the socket task ends.
struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> (Self, usize) {
        let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
        crate::metrics::record_ws_connections(count);
        (Self(Arc::clone(counter)), count)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.0.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        crate::metrics::record_ws_connections(remaining);
    }
}

async fn send_json<T: Serialize>(sender: &Sender, message: &T) -> bool {
    let Ok(json) = serde_json::to_string(message) else {
        return false;
    };
    sender.lock().await.send(Message::Text(json)).await.is_ok()
}

async fn handle_socket(
    socket: WebSocket,
    showtime_id: ShowtimeId,
    user_id: Option<UserId>,
    state: AppState,
) {
    let (_guard, count) = ConnectionGuard::acquire(&state.ws_connections);
    info!(
        showtime_id = %showtime_id,
        total_connections = count,
        "WebSocket connection established"
    );

    let (sender, mut receiver) = socket.split();
    let sender: Sender = Arc::new(Mutex::new(sender));

    // Subscribe before the snapshot so no delta falls between the two
    let mut notifications = state.bus.subscribe(showtime_id).await;
    let mut last_sequence = match state.holds.seat_map(showtime_id, user_id).await {
        Ok(seat_map) => {
            let sequence = seat_map.sequence;
            if !send_json(&sender, &ServerMessage::Resync { seat_map }).await {
                debug!("Client disconnected before initial snapshot");
                return;
            }
            sequence
        }
        Err(e) => {
            warn!(showtime_id = %showtime_id, error = %e, "Seat map unavailable for new subscriber");
            return;
        }
    };

    let event_sender = Arc::clone(&sender);
    let event_holds = Arc::clone(&state.holds);
    let mut event_task = tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(message) => {
                    if message.sequence <= last_sequence {
                        continue;
                    }
                    last_sequence = message.sequence;
                    if !send_json(&event_sender, &message).await {
                        debug!("Client disconnected during notification stream");
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(showtime_id = %showtime_id, missed, "Subscriber lagged, sending resync");
                    let Ok(seat_map) = event_holds.seat_map(showtime_id, user_id).await else {
                        break;
                    };
                    last_sequence = seat_map.sequence;
                    if !send_json(&event_sender, &ServerMessage::Resync { seat_map }).await {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("WebSocket notification task terminated");
    });

    let ping_sender = Arc::clone(&sender);
    let mut ping_interval = interval(state.websocket.ping_interval);
    let mut ping_task = tokio::spawn(async move {
        // First tick fires immediately
        ping_interval.tick().await;
        loop {
            ping_interval.tick().await;
            if !send_json(&ping_sender, &ServerMessage::Ping).await {
                break;
            }
        }
        debug!("WebSocket ping task terminated");
    });

    let recv_sender = Arc::clone(&sender);
    let recv_state = state.clone();
    let idle_timeout = state.websocket.idle_timeout;
    let mut recv_task = tokio::spawn(async move {
        let timeout = tokio::time::sleep(idle_timeout);
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                incoming = receiver.next() => {
                    let Some(Ok(msg)) = incoming else { break };
                    timeout.as_mut().reset(Instant::now() + idle_timeout);
                    match msg {
                        Message::Text(text) => {
                            let reply = match serde_json::from_str::<ClientMessage>(&text) {
                                Ok(command) => handle_command(&recv_state, showtime_id, user_id, command).await,
                                Err(e) => Some(ServerMessage::error(
                                    ErrorCode::ValidationError,
                                    format!("malformed message: {e}"),
                                )),
                            };
                            if let Some(reply) = reply {
                                if !send_json(&recv_sender, &reply).await {
                                    break;
                                }
                            }
                        }
                        Message::Close(_) => {
                            info!("Client requested close");
                            break;
                        }
                        _ => {}
                    }
                }
                () = &mut timeout => {
                    warn!(showtime_id = %showtime_id, "WebSocket idle timeout");
                    break;
                }
            }
        }
        debug!("WebSocket receive task terminated");
    });

    tokio::select! {
        _ = (&mut event_task) => {
            ping_task.abort();
            recv_task.abort();
        },
        _ = (&mut ping_task) => {
            event_task.abort();
            recv_task.abort();
        },
        _ = (&mut recv_task) => {
            event_task.abort();
            ping_task.abort();
        },
    }

    info!(
        showtime_id = %showtime_id,
        total_connections = state.ws_connections.load(Ordering::Relaxed).saturating_sub(1),
        "WebSocket connection closed"
    );
}

// ============================================================================
// Commands
// ============================================================================

/// Apply one client command and build its reply.
///
/// `connection_user` is the `user_id` the socket connected with.
pub async fn handle_command(
    state: &AppState,
    showtime_id: ShowtimeId,
    connection_user: Option<UserId>,
    command: ClientMessage,
) -> Option<ServerMessage> {
    let target = |requested: Option<ShowtimeId>| requested.is_none_or(|id| id == showtime_id);

    match command {
        ClientMessage::Ping => Some(ServerMessage::Pong),
        ClientMessage::Pong => None,
        ClientMessage::ReserveSeats {
            seat_ids,
            showtime_id: requested,
            user_id,
        } => {
            if !target(requested) {
                return Some(wrong_showtime());
            }
            let user_id = match acting_user(user_id, connection_user) {
                Ok(user_id) => user_id,
                Err(reply) => return Some(reply),
            };
            Some(
                match state.holds.claim_seats(user_id, showtime_id, seat_ids).await {
                    Ok(session) => ServerMessage::held(Some(&session)),
                    Err(e) => {
                        debug!(user_id = %user_id, error = %e, "reserveSeats rejected");
                        ServerMessage::rejected(&e)
                    }
                },
            )
        }
        ClientMessage::ModifySeats {
            add,
            remove,
            user_id,
        } => {
            let user_id = match acting_user(user_id, connection_user) {
                Ok(user_id) => user_id,
                Err(reply) => return Some(reply),
            };
            Some(
                match state.holds.modify_seats(user_id, showtime_id, add, remove).await {
                    Ok(session) => ServerMessage::held(session.as_ref()),
                    Err(e) => ServerMessage::rejected(&e),
                },
            )
        }
        ClientMessage::CancelReservation {
            seat_ids,
            showtime_id: requested,
            user_id,
        } => {
            if !target(requested) {
                return Some(wrong_showtime());
            }
            let user_id = match acting_user(user_id, connection_user) {
                Ok(user_id) => user_id,
                Err(reply) => return Some(reply),
            };
            Some(cancel(state, showtime_id, user_id, seat_ids).await)
        }
    }
}

async fn cancel(
    state: &AppState,
    showtime_id: ShowtimeId,
    user_id: UserId,
    seat_ids: Vec<SeatId>,
) -> ServerMessage {
    if seat_ids.is_empty() {
        return match state.holds.release_session(user_id, showtime_id).await {
            Ok(released) => ServerMessage::CancelResult {
                success: true,
                released,
                message: None,
            },
            Err(e) => cancel_failed(&e),
        };
    }

    match state
        .holds
        .modify_seats(user_id, showtime_id, Vec::new(), seat_ids.clone())
        .await
    {
        Ok(session) => {
            let still_held = session.map(|s| s.seats).unwrap_or_default();
            ServerMessage::CancelResult {
                success: true,
                released: seat_ids
                    .into_iter()
                    .filter(|seat| !still_held.contains(seat))
                    .collect(),
                message: None,
            }
        }
        // Nothing left to cancel
        Err(HoldError::SessionExpired) => ServerMessage::CancelResult {
            success: true,
            released: Vec::new(),
            message: None,
        },
        Err(e) => cancel_failed(&e),
    }
}

fn cancel_failed(error: &HoldError) -> ServerMessage {
    ServerMessage::CancelResult {
        success: false,
        released: Vec::new(),
        message: Some(error.to_string()),
    }
}

fn wrong_showtime() -> ServerMessage {
    ServerMessage::error(
        ErrorCode::ValidationError,
        "command names a different showtime than this connection",
    )
}

/// A command may repeat the connection's user but never act for another one
fn acting_user(
    requested: Option<UserId>,
    connection: Option<UserId>,
) -> Result<UserId, ServerMessage> {
    match (requested, connection) {
        (Some(requested), Some(connection)) if requested != connection => {
            Err(ServerMessage::error(
                ErrorCode::ValidationError,
                "command names a different user than this connection",
            ))
        }
        (Some(user_id), _) | (None, Some(user_id)) => Ok(user_id),
        (None, None) => Err(ServerMessage::error(
            ErrorCode::ValidationError,
            "user_id is required",
        )),
    }
}
