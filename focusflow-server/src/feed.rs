//! Change-feed websocket: `GET /ws?user=<id>`.
//!
//! The connection lifecycle:
//! 1. The upgrade is refused unless `user` is a registered user.
//! 2. The client sends a [`ClientFrame::Subscribe`]; the filter is checked
//!    against the user's access and answered with `Subscribed` or `Error`.
//! 3. Matching changes stream as [`ServerFrame::Change`]; a lagging
//!    subscriber gets [`ServerFrame::Gap`] and must refetch.
//! 4. A later `Subscribe` replaces the subscription; `Unsubscribe` ends it.
//!
//! Task-scoped subscriptions re-check access before each change is sent, so
//! a revoked grantee stops receiving that task's rows.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use focusflow::backend::{ChangeFeed, Directory};
use focusflow::realtime::{FeedItem, Subscription};
use focusflow::sharing::SharingError;
use focusflow_proto::feed::{self, ClientFrame, FeedFilter, RowFilter, ServerFrame, Table};
use focusflow_proto::ids::{TaskId, UserId};
use focusflow_proto::share::EffectivePermission;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::{ApiError, ServerState};

/// Query string of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct FeedParams {
    /// The connecting user.
    pub user: UserId,
}

/// What a subscription needs to keep receiving rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Rows that name the user directly; nothing to re-check.
    Own,
    /// Rows of one task, visible while the user holds `need`.
    Task { task_id: TaskId, need: Need },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Need {
    View,
    Chat,
    Owner,
}

impl Need {
    const fn satisfied_by(self, permission: EffectivePermission) -> bool {
        match self {
            Self::View => permission.can_view(),
            Self::Chat => permission.can_chat(),
            Self::Owner => matches!(permission, EffectivePermission::Owner),
        }
    }
}

/// axum handler that upgrades an HTTP request to a feed connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Query(params): Query<FeedParams>,
) -> Result<Response, ApiError> {
    if state.backend().get_profile(&params.user).await?.is_none() {
        return Err(ApiError::Unauthenticated);
    }
    let user = params.user;
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, user))
        .into_response())
}

/// Handles an upgraded feed connection for `user`.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>, user: UserId) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    tracing::info!(user_id = %user, "feed client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match feed::encode(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode feed frame");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                tracing::warn!(user_id = %user, "feed write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        let mut forward: Option<JoinHandle<()>> = None;
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_frame(text.as_str(), user, &reader_state, &tx, &mut forward).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        if let Some(task) = forward {
            task.abort();
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    tracing::info!(user_id = %user, "feed client disconnected");
}

async fn handle_frame(
    text: &str,
    user: UserId,
    state: &Arc<ServerState>,
    tx: &mpsc::UnboundedSender<ServerFrame>,
    forward: &mut Option<JoinHandle<()>>,
) {
    let frame: ClientFrame = match feed::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(user_id = %user, error = %e, "bad feed frame");
            let _ = tx.send(ServerFrame::Error {
                reason: "malformed frame".to_string(),
            });
            return;
        }
    };

    // Either frame ends the current subscription.
    if let Some(task) = forward.take() {
        task.abort();
    }

    let ClientFrame::Subscribe { filter } = frame else {
        tracing::debug!(user_id = %user, "feed unsubscribed");
        return;
    };

    match authorize(state, user, &filter).await {
        Ok(scope) => {
            let subscription = state.backend().subscribe(filter.clone());
            tracing::debug!(user_id = %user, table = ?filter.table, "feed subscribed");
            let _ = tx.send(ServerFrame::Subscribed { filter });
            *forward = Some(tokio::spawn(forward_changes(
                subscription,
                scope,
                user,
                Arc::clone(state),
                tx.clone(),
            )));
        }
        Err(e) => {
            tracing::warn!(user_id = %user, error = %e, "feed subscription refused");
            let _ = tx.send(ServerFrame::Error {
                reason: e.user_message(),
            });
        }
    }
}

/// Decides whether `user` may follow `filter`.
async fn authorize(
    state: &ServerState,
    user: UserId,
    filter: &FeedFilter,
) -> Result<Scope, SharingError> {
    let access = state.app.access();
    match (filter.table, filter.rows) {
        (
            Table::Shares,
            RowFilter::Grantee(id) | RowFilter::Owner(id) | RowFilter::Party(id),
        )
        | (Table::Tasks, RowFilter::Owner(id))
            if id == user =>
        {
            Ok(Scope::Own)
        }
        (Table::Shares, RowFilter::Task(task_id)) => {
            access.require_owner(task_id, user).await?;
            Ok(Scope::Task {
                task_id,
                need: Need::Owner,
            })
        }
        (Table::Tasks | Table::Activity, RowFilter::Task(task_id)) => {
            access.require_view(task_id, user).await?;
            Ok(Scope::Task {
                task_id,
                need: Need::View,
            })
        }
        (Table::ChatMessages, RowFilter::Task(task_id)) => {
            access.require_chat(task_id, user).await?;
            Ok(Scope::Task {
                task_id,
                need: Need::Chat,
            })
        }
        _ => Err(SharingError::Forbidden(
            "subscriptions must be limited to rows you can see".to_string(),
        )),
    }
}

/// Whether a subscription with `scope` may still receive rows.
async fn still_allowed(state: &ServerState, user: UserId, scope: Scope) -> bool {
    let Scope::Task { task_id, need } = scope else {
        return true;
    };
    match state.app.access().permission_for(task_id, user).await {
        Ok((_, permission)) => need.satisfied_by(permission),
        // The task is gone; its final delete is still theirs to see.
        Err(SharingError::NotFound(_)) => true,
        Err(_) => false,
    }
}

async fn forward_changes(
    mut subscription: Subscription,
    scope: Scope,
    user: UserId,
    state: Arc<ServerState>,
    tx: mpsc::UnboundedSender<ServerFrame>,
) {
    loop {
        let item = tokio::select! {
            item = subscription.next() => item,
            () = tx.closed() => return,
        };
        let frame = match item {
            None => {
                let _ = tx.send(ServerFrame::Error {
                    reason: "feed disconnected, subscribe again".to_string(),
                });
                return;
            }
            Some(FeedItem::Gap { missed }) => {
                tracing::debug!(user_id = %user, missed, "feed subscriber lagged");
                ServerFrame::Gap { missed }
            }
            Some(FeedItem::Change(event)) => {
                if !still_allowed(&state, user, scope).await {
                    tracing::info!(user_id = %user, "feed access revoked");
                    let _ = tx.send(ServerFrame::Error {
                        reason: SharingError::Forbidden(String::new()).user_message(),
                    });
                    return;
                }
                ServerFrame::Change(event)
            }
        };
        if tx.send(frame).is_err() {
            return;
        }
    }
}
