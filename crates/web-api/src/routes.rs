use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use application::{
    CreateConversationRequest, DislikeRequest, EditMessageRequest, LikeRequest,
    MarkAsReadRequest, SendMessageRequest,
};
use domain::Timestamp;

use crate::{
    dto::{
        ConversationDto, MatchDecisionDto, MatchDto, MessageDto, MessageReceiptDto, TypingDto,
    },
    error::ApiError,
    notify_routes,
    state::AppState,
    ws_connection,
};

const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LikePayload {
    user_id: String,
    target_user_id: String,
    #[serde(default)]
    is_super_like: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DislikePayload {
    user_id: String,
    target_user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationPayload {
    creator_id: String,
    participant_ids: Vec<String>,
    #[serde(default)]
    is_group: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequesterQuery {
    user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    user_id: String,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    sender_id: String,
    receiver_id: Option<String>,
    content: String,
    reply_to: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    user_id: String,
    is_typing: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddParticipantPayload {
    actor_id: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActorQuery {
    actor_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliveredPayload {
    receiver_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadPayload {
    reader_id: String,
    read_at: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditPayload {
    editor_id: String,
    content: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_connection::websocket_upgrade))
        .merge(notify_routes::routes())
        .nest("/api/v1", api_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/matches/like", post(like))
        .route("/matches/dislike", post(dislike))
        .route("/users/{user_id}/matches", get(list_matches))
        .route("/conversations", post(create_conversation))
        .route("/conversations/{room_id}", get(get_conversation))
        .route(
            "/conversations/{room_id}/messages",
            post(send_message).get(list_messages),
        )
        .route("/conversations/{room_id}/typing", post(set_typing))
        .route("/conversations/{room_id}/participants", post(add_participant))
        .route(
            "/conversations/{room_id}/participants/{user_id}",
            delete(remove_participant),
        )
        .route("/messages/{message_id}", patch(edit_message))
        .route("/messages/{message_id}/delivered", post(mark_delivered))
        .route("/messages/{message_id}/read", post(mark_read))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn like(
    State(state): State<AppState>,
    Json(payload): Json<LikePayload>,
) -> Result<Json<MatchDecisionDto>, ApiError> {
    let decision = state
        .match_service
        .like(LikeRequest {
            user_id: payload.user_id,
            target_user_id: payload.target_user_id,
            is_super_like: payload.is_super_like,
        })
        .await?;

    Ok(Json(decision.into()))
}

async fn dislike(
    State(state): State<AppState>,
    Json(payload): Json<DislikePayload>,
) -> Result<Json<MatchDecisionDto>, ApiError> {
    let decision = state
        .match_service
        .dislike(DislikeRequest {
            user_id: payload.user_id,
            target_user_id: payload.target_user_id,
        })
        .await?;

    Ok(Json(decision.into()))
}

async fn list_matches(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<MatchDto>>, ApiError> {
    let matches = state.match_service.list_confirmed(&user_id).await?;
    Ok(Json(matches.iter().map(MatchDto::from).collect()))
}

async fn create_conversation(
    State(state): State<AppState>,
    Json(payload): Json<CreateConversationPayload>,
) -> Result<(StatusCode, Json<ConversationDto>), ApiError> {
    let conversation = state
        .conversation_service
        .create_conversation(CreateConversationRequest {
            creator_id: payload.creator_id,
            participant_ids: payload.participant_ids,
            is_group: payload.is_group,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(ConversationDto::from(&conversation))))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<RequesterQuery>,
) -> Result<Json<ConversationDto>, ApiError> {
    let conversation = state
        .conversation_service
        .get_conversation(&room_id, &query.user_id)
        .await?;

    Ok(Json(ConversationDto::from(&conversation)))
}

async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<MessageReceiptDto>), ApiError> {
    let receipt = state
        .conversation_service
        .send_message(SendMessageRequest {
            room_id,
            sender_id: payload.sender_id,
            receiver_id: payload.receiver_id,
            content: payload.content,
            reply_to: payload.reply_to,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(receipt.into())))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageDto>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let messages = state
        .conversation_service
        .list_messages(&room_id, &query.user_id, limit)
        .await?;

    Ok(Json(messages.iter().map(MessageDto::from).collect()))
}

async fn set_typing(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(payload): Json<TypingPayload>,
) -> Result<Json<TypingDto>, ApiError> {
    let typing = state
        .conversation_service
        .set_typing(&room_id, &payload.user_id, payload.is_typing)
        .await?;

    Ok(Json(TypingDto {
        room_id,
        typing_users: typing.iter().map(ToString::to_string).collect(),
    }))
}

async fn add_participant(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(payload): Json<AddParticipantPayload>,
) -> Result<Json<ConversationDto>, ApiError> {
    let conversation = state
        .conversation_service
        .add_participant(&room_id, &payload.actor_id, &payload.user_id)
        .await?;

    Ok(Json(ConversationDto::from(&conversation)))
}

async fn remove_participant(
    State(state): State<AppState>,
    Path((room_id, user_id)): Path<(String, String)>,
    Query(query): Query<ActorQuery>,
) -> Result<Json<ConversationDto>, ApiError> {
    let conversation = state
        .conversation_service
        .remove_participant(&room_id, &query.actor_id, &user_id)
        .await?;

    Ok(Json(ConversationDto::from(&conversation)))
}

async fn mark_delivered(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Json(payload): Json<DeliveredPayload>,
) -> Result<Json<MessageReceiptDto>, ApiError> {
    let receipt = state
        .conversation_service
        .mark_as_delivered(&message_id, &payload.receiver_id)
        .await?;

    Ok(Json(receipt.into()))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Json(payload): Json<ReadPayload>,
) -> Result<Json<MessageReceiptDto>, ApiError> {
    let receipt = state
        .conversation_service
        .mark_as_read(MarkAsReadRequest {
            message_id,
            reader_id: payload.reader_id,
            read_at: payload.read_at,
        })
        .await?;

    Ok(Json(receipt.into()))
}

async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Json(payload): Json<EditPayload>,
) -> Result<Json<MessageDto>, ApiError> {
    let message = state
        .conversation_service
        .edit_message(EditMessageRequest {
            message_id,
            editor_id: payload.editor_id,
            content: payload.content,
        })
        .await?;

    Ok(Json(MessageDto::from(&message)))
}
