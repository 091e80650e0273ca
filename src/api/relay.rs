// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # WebSocket Relay Session
//!
//! Every inbound text frame is a JSON array whose first element names the
//! command. Replies are JSON arrays too.
//!
//! | Request | Reply |
//! |---------|-------|
//! | `["POINTER", pointer, "PUBLISH", base64?]` | `["OK", id, pointerhash]` |
//! | `["POINTER", claim, "DELETE"]` | `["OK", claimId, deletedId]` |
//! | `["REQDATA", pointerId]` | `["DATAOK", pointerId, pointerhash, base64]` |
//! | `["REQPOINTER", reqId, criteria]` | `["POINTERS", reqId, [..]]`, `["REQEND", reqId]` |
//!
//! Failures reply with `["ERROR", code, contextId, message]`. A session that
//! sends nothing for the configured timeout is closed.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RelayError, RelayResult};
use crate::pointer::PointerDraft;
use crate::protocol::PointerService;
use crate::state::AppState;

const POINTER: &str = "POINTER";
const PUBLISH: &str = "PUBLISH";
const DELETE: &str = "DELETE";
const REQUEST_DATA: &str = "REQDATA";
const REQUEST_POINTER: &str = "REQPOINTER";

/// Upgrade handler for `GET /ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| session(socket, state))
}

async fn session(mut socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    info!(%session_id, "Session opened");

    loop {
        let message = match tokio::time::timeout(state.session_timeout, socket.recv()).await {
            Err(_) => {
                info!(%session_id, "Session idle, closing");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(%session_id, error = %e, "Session receive failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        let replies = match message {
            Message::Text(text) => dispatch(&state.service, text.as_str()).await,
            Message::Binary(_) => vec![RelayError::invalid_input().to_wire()],
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        for reply in replies {
            if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                debug!(%session_id, "Session send failed");
                return;
            }
        }
    }

    info!(%session_id, "Session closed");
}

/// Handle one raw frame and return the frames to send back.
pub async fn dispatch(service: &PointerService, raw: &str) -> Vec<Value> {
    match handle(service, raw).await {
        Ok(replies) => replies,
        Err(err) => {
            warn!(
                code = err.code(),
                context_id = %err.context_id,
                error = %err.message,
                "Request rejected"
            );
            vec![err.to_wire()]
        }
    }
}

async fn handle(service: &PointerService, raw: &str) -> RelayResult<Vec<Value>> {
    let frame = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(frame)) => frame,
        _ => return Err(RelayError::invalid_input()),
    };

    let command = frame
        .first()
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| RelayError::invalid_command("Invalid input"))?
        .to_ascii_uppercase();

    match command.as_str() {
        POINTER => handle_pointer(service, &frame).await,
        REQUEST_DATA => {
            let [_, id] = frame.as_slice() else {
                return Err(RelayError::invalid_command("Invalid input"));
            };
            let id = id
                .as_str()
                .ok_or_else(|| RelayError::invalid_command("Invalid input"))?;

            let (pointerhash, data) = service.get_blob_by_pointer_id(id).await?;
            Ok(vec![json!(["DATAOK", id, pointerhash, data])])
        }
        REQUEST_POINTER => {
            let [_, request_id, criteria] = frame.as_slice() else {
                return Err(RelayError::invalid_command("Invalid input"));
            };
            let context = match request_id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };

            let pointers = service.query(&context, criteria).await?;
            debug!(request_id = %context, count = pointers.len(), "Served pointer query");
            Ok(vec![
                json!(["POINTERS", request_id, pointers]),
                json!(["REQEND", request_id]),
            ])
        }
        _ => Err(RelayError::invalid_command("Not found")),
    }
}

async fn handle_pointer(service: &PointerService, frame: &[Value]) -> RelayResult<Vec<Value>> {
    if frame.len() < 3 {
        return Err(RelayError::invalid_command("Invalid input"));
    }

    let context = frame[1]
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let draft: PointerDraft = serde_json::from_value(frame[1].clone())
        .map_err(|_| RelayError::invalid_pointer(&context, "Pointer object malformed"))?;

    let sub_command = frame[2]
        .as_str()
        .map(str::to_ascii_uppercase)
        .unwrap_or_default();

    match sub_command.as_str() {
        PUBLISH => {
            let blob = match frame.get(3) {
                None | Some(Value::Null) => None,
                Some(Value::String(data)) => Some(data.clone()),
                Some(_) => {
                    return Err(RelayError::invalid_values(
                        &context,
                        "Invalid data encoding, expecting base64",
                    ))
                }
            };
            let (id, pointerhash) = service.publish(draft, blob).await?;
            Ok(vec![json!(["OK", id, pointerhash])])
        }
        DELETE => {
            let deleted = service.delete(draft).await?;
            Ok(vec![json!(["OK", context, deleted])])
        }
        _ => Err(RelayError::invalid_command("Not found")),
    }
}
