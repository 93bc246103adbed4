use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
    Json,
};
use serde_json::{json, Value};

use crate::{
    db::filter::{parse_page, Page},
    error::AppResult,
    models::{
        auth::AuthenticatedUser,
        message::{Message, MessageForm, MessageListItem, MessageListQuery},
        BulkRequest,
    },
    routes::{client_ip, created},
    services::{
        audit::{self, AuditEntry},
        messages::MessageService,
    },
    AppState,
};

pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(q): Query<MessageListQuery>,
) -> AppResult<Json<Page<MessageListItem>>> {
    let page = parse_page(q.page.as_deref());
    Ok(Json(MessageService::list(&state.db, user.user_id, &q, page).await?))
}

pub async fn get_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Message>> {
    Ok(Json(MessageService::get(&state.db, user.user_id, id).await?))
}

pub async fn create_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<MessageForm>,
) -> AppResult<Response> {
    let message = MessageService::create(&state.db, user.user_id, &body).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "message.create", "message", message.id)
            .details(format!("{} ({})", message.sujet, message.status))
            .ip(client_ip(&headers)),
    );
    Ok(created(format!("/messages/{}", message.id), message))
}

pub async fn send_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> AppResult<Json<Message>> {
    let message = MessageService::send(&state.db, user.user_id, id).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "message.send", "message", message.id).ip(client_ip(&headers)),
    );
    Ok(Json(message))
}

pub async fn bulk_messages(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<BulkRequest>,
) -> AppResult<Json<Value>> {
    let affected = MessageService::bulk(&state.db, user.user_id, &body).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::bulk(user.user_id, &format!("message.bulk.{}", body.action.trim()), "message")
            .details(format!("{affected} message(s) : {:?}", body.clean_ids()))
            .ip(client_ip(&headers)),
    );
    Ok(Json(json!({ "affected": affected })))
}
