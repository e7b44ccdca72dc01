use crate::room_manager::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use shared::{ClientMessage, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !origin_allowed(&state, &headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(|socket| handle_socket(socket, state))
        .into_response()
}

fn origin_allowed(state: &AppState, headers: &HeaderMap) -> bool {
    if state.config.allowed_origins.is_empty() {
        return true;
    }
    headers
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|origin| {
            state
                .config
                .allowed_origins
                .iter()
                .any(|allowed| allowed == origin)
        })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Forward engine events from the channel to the WebSocket.
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    let conn_id = uuid::Uuid::new_v4().to_string();
    state.fanout.register(&conn_id, tx);
    tracing::info!(conn_id = %conn_id, "connection opened");

    while let Some(Ok(msg)) = receiver.next().await {
        if let Message::Text(text) = msg {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(event) => dispatch(&state, &conn_id, event).await,
                Err(err) => {
                    tracing::debug!(conn_id = %conn_id, error = %err, "undecodable event");
                    state.fanout.send(
                        &conn_id,
                        ServerMessage::RequestError {
                            error: "알 수 없는 요청입니다.".to_string(),
                        },
                    );
                }
            }
        }
    }

    tracing::info!(conn_id = %conn_id, "connection closed");
    state.drop_connection(&conn_id);
}

async fn dispatch(state: &Arc<AppState>, conn_id: &str, event: ClientMessage) {
    match event {
        ClientMessage::GetSubjects => state.handle_get_subjects(conn_id).await,
        ClientMessage::GetRooms => state.handle_get_rooms(conn_id).await,
        ClientMessage::GetMyRoom { user_id } => {
            state.handle_get_my_room(conn_id, &user_id).await;
        }
        ClientMessage::GetUserProfile { user_id } => {
            state.handle_get_user_profile(conn_id, &user_id).await;
        }
        ClientMessage::CreateRoom {
            user_id,
            subject_id,
        } => {
            state.handle_create_room(conn_id, &user_id, &subject_id).await;
        }
        ClientMessage::JoinRoom { room_id, user_id } => {
            state.handle_join_room(conn_id, &room_id, &user_id).await;
        }
        ClientMessage::LeaveRoom { room_id, user_id } => {
            state.handle_leave_room(conn_id, &room_id, &user_id).await;
        }
        ClientMessage::SelectRole {
            room_id,
            user_id,
            role,
        } => {
            state
                .handle_select_role(conn_id, &room_id, &user_id, role)
                .await;
        }
        ClientMessage::SelectPosition {
            room_id,
            user_id,
            position,
        } => {
            state
                .handle_select_position(conn_id, &room_id, &user_id, position)
                .await;
        }
        ClientMessage::PlayerReady { room_id, user_id } => {
            state.handle_player_ready(conn_id, &room_id, &user_id).await;
        }
        ClientMessage::JoinDiscussionRoom { room_id, user_id } => {
            state
                .handle_join_discussion_room(conn_id, &room_id, &user_id)
                .await;
        }
        ClientMessage::DiscussionViewReady { room_id, user_id } => {
            Arc::clone(state)
                .handle_discussion_view_ready(conn_id, &room_id, &user_id)
                .await;
        }
        ClientMessage::SendMessage {
            room_id,
            user_id,
            message,
        } => {
            Arc::clone(state)
                .handle_send_message(conn_id, &room_id, &user_id, &message)
                .await;
        }
        ClientMessage::TimeOverflow {
            room_id, user_id, ..
        } => {
            state.handle_time_overflow(conn_id, &room_id, &user_id).await;
        }
        ClientMessage::GetMessages { room_id } => {
            state.handle_get_messages(conn_id, &room_id).await;
        }
        ClientMessage::GetRoomState { room_id, user_id } => {
            state
                .handle_get_room_state(conn_id, &room_id, &user_id)
                .await;
        }
        ClientMessage::RefereeAddPoints {
            room_id,
            target_user_id,
            points,
            referee_id,
        } => {
            state
                .handle_referee_add_points(conn_id, &room_id, &target_user_id, points, &referee_id)
                .await;
        }
        ClientMessage::RefereeDeductPoints {
            room_id,
            target_user_id,
            points,
            referee_id,
        } => {
            state
                .handle_referee_deduct_points(
                    conn_id,
                    &room_id,
                    &target_user_id,
                    points,
                    &referee_id,
                )
                .await;
        }
        ClientMessage::RefereeExtendTime {
            room_id,
            target_user_id,
            seconds,
            referee_id,
        } => {
            state
                .handle_referee_extend_time(conn_id, &room_id, &target_user_id, seconds, &referee_id)
                .await;
        }
        ClientMessage::RefereeReduceTime {
            room_id,
            target_user_id,
            seconds,
            referee_id,
        } => {
            state
                .handle_referee_reduce_time(conn_id, &room_id, &target_user_id, seconds, &referee_id)
                .await;
        }
        ClientMessage::RefereeSubmitScores {
            room_id,
            scores,
            referee_id,
        } => {
            state
                .handle_referee_submit_scores(conn_id, &room_id, scores, &referee_id)
                .await;
        }
    }
}
