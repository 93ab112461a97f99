//! Integration tests for the server's change-feed websocket.
//!
//! Starts the server in-process on an OS-assigned port, seeds data through
//! the shared state and follows it over `/ws` with a real websocket client.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use focusflow::config::CoreConfig;
use focusflow_proto::feed::{
    self, ChangeOp, ClientFrame, FeedFilter, Row, RowFilter, ServerFrame, Table,
};
use focusflow_proto::ids::{TaskId, UserId};
use focusflow_proto::share::{PermissionLevel, ShareDecision};
use focusflow_proto::task::NewTask;
use focusflow_server::api::{self, ServerState};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

type Ws = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Running {
    addr: std::net::SocketAddr,
    state: Arc<ServerState>,
    alice: UserId,
    bob: UserId,
    task: TaskId,
    _handle: tokio::task::JoinHandle<()>,
}

async fn start() -> Running {
    let (state, _warnings) = ServerState::new(CoreConfig::default());
    let state = Arc::new(state);
    let alice = state
        .backend()
        .register_user("alice@example.com", None)
        .await
        .unwrap()
        .id;
    let bob = state
        .backend()
        .register_user("bob@example.com", None)
        .await
        .unwrap()
        .id;
    let task = state
        .app
        .tasks()
        .create_task(alice, NewTask::titled("Ship it"))
        .await
        .unwrap()
        .id;
    let (addr, handle) = api::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    Running {
        addr,
        state,
        alice,
        bob,
        task,
        _handle: handle,
    }
}

async fn connect(addr: std::net::SocketAddr, user: UserId) -> Ws {
    let url = format!("ws://{addr}/ws?user={user}");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

async fn ws_send(ws: &mut Ws, frame: &ClientFrame) {
    let text = feed::encode(frame).unwrap();
    ws.send(tungstenite::Message::Text(text.into())).await.unwrap();
}

async fn ws_send_raw(ws: &mut Ws, text: &str) {
    ws.send(tungstenite::Message::Text(text.to_string().into()))
        .await
        .unwrap();
}

async fn ws_recv(ws: &mut Ws) -> ServerFrame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .unwrap();
        if let tungstenite::Message::Text(text) = msg {
            return feed::decode(text.as_str()).unwrap();
        }
    }
}

async fn subscribe(ws: &mut Ws, filter: FeedFilter) -> ServerFrame {
    ws_send(ws, &ClientFrame::Subscribe { filter }).await;
    ws_recv(ws).await
}

async fn share_with_bob(r: &Running, level: PermissionLevel) -> focusflow_proto::share::Share {
    r.state
        .app
        .ledger()
        .create_share(r.alice, r.task, "bob@example.com", level)
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn grantee_receives_share_changes() {
    let r = start().await;
    let mut ws = connect(r.addr, r.bob).await;
    let filter = FeedFilter::table(Table::Shares).rows(RowFilter::Grantee(r.bob));
    assert_eq!(
        subscribe(&mut ws, filter.clone()).await,
        ServerFrame::Subscribed { filter }
    );

    let share = share_with_bob(&r, PermissionLevel::View).await;
    let ServerFrame::Change(event) = ws_recv(&mut ws).await else {
        panic!("expected a change frame");
    };
    assert_eq!(event.op, ChangeOp::Insert);
    assert_eq!(event.row, Row::Shares(share.clone()));

    r.state
        .app
        .workflow()
        .respond(r.bob, share.id, ShareDecision::Accepted)
        .await
        .unwrap();
    let ServerFrame::Change(event) = ws_recv(&mut ws).await else {
        panic!("expected a change frame");
    };
    assert_eq!(event.op, ChangeOp::Update);
}

#[tokio::test]
async fn unknown_user_cannot_connect() {
    let r = start().await;
    let url = format!("ws://{}/ws?user={}", r.addr, UserId::new());
    assert!(tokio_tungstenite::connect_async(&url).await.is_err());
}

#[tokio::test]
async fn unscoped_or_foreign_subscriptions_are_refused() {
    let r = start().await;
    let mut ws = connect(r.addr, r.bob).await;

    let frame = subscribe(&mut ws, FeedFilter::table(Table::Shares)).await;
    assert!(matches!(frame, ServerFrame::Error { .. }));

    let theirs = FeedFilter::table(Table::Tasks).rows(RowFilter::Owner(r.alice));
    assert!(matches!(
        subscribe(&mut ws, theirs).await,
        ServerFrame::Error { .. }
    ));

    let chat = FeedFilter::table(Table::ChatMessages).rows(RowFilter::Task(r.task));
    assert!(matches!(
        subscribe(&mut ws, chat).await,
        ServerFrame::Error { .. }
    ));
}

#[tokio::test]
async fn revoked_grantee_stops_receiving_task_rows() {
    let r = start().await;
    let share = share_with_bob(&r, PermissionLevel::View).await;
    r.state
        .app
        .workflow()
        .respond(r.bob, share.id, ShareDecision::Accepted)
        .await
        .unwrap();

    let mut ws = connect(r.addr, r.bob).await;
    let filter = FeedFilter::table(Table::Activity).rows(RowFilter::Task(r.task));
    assert!(matches!(
        subscribe(&mut ws, filter).await,
        ServerFrame::Subscribed { .. }
    ));

    // Still allowed: the owner's status change comes through.
    r.state
        .app
        .tasks()
        .update_status(
            r.alice,
            r.task,
            focusflow_proto::task::TaskStatus::InProgress,
        )
        .await
        .unwrap();
    assert!(matches!(ws_recv(&mut ws).await, ServerFrame::Change(_)));

    // The revoke's own activity record is the first row Bob may not see.
    r.state
        .app
        .ledger()
        .revoke(r.alice, r.task, r.bob)
        .await
        .unwrap();
    assert_eq!(
        ws_recv(&mut ws).await,
        ServerFrame::Error {
            reason: "You don't have permission to do that.".to_string(),
        }
    );
}

#[tokio::test]
async fn malformed_frames_are_reported() {
    let r = start().await;
    let mut ws = connect(r.addr, r.alice).await;
    ws_send_raw(&mut ws, "{not json").await;
    assert_eq!(
        ws_recv(&mut ws).await,
        ServerFrame::Error {
            reason: "malformed frame".to_string(),
        }
    );

    // The connection survives and accepts a valid subscription.
    let filter = FeedFilter::table(Table::Tasks).rows(RowFilter::Owner(r.alice));
    assert!(matches!(
        subscribe(&mut ws, filter).await,
        ServerFrame::Subscribed { .. }
    ));
}

#[tokio::test]
async fn owner_follows_own_tasks() {
    let r = start().await;
    let mut ws = connect(r.addr, r.alice).await;
    let filter = FeedFilter::table(Table::Tasks).rows(RowFilter::Owner(r.alice));
    subscribe(&mut ws, filter).await;

    let task = r
        .state
        .app
        .tasks()
        .create_task(r.alice, NewTask::titled("Second"))
        .await
        .unwrap();
    let ServerFrame::Change(event) = ws_recv(&mut ws).await else {
        panic!("expected a change frame");
    };
    assert_eq!(event.row, Row::Tasks(task));
}
