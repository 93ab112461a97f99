//! HTTP surface: shared state, caller identity, error mapping and routes.
//!
//! Every route except `POST /users` identifies its caller with the
//! `x-user-id` header. The header must carry the id of a registered user;
//! anything else is `401`. Sharing failures map onto status codes through
//! [`ApiError`], and the JSON error body carries the message a user should
//! see next to the developer detail.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use focusflow::App;
use focusflow::backend::memory::MemoryBackend;
use focusflow::backend::{ActivityStore, BackendError, Directory};
use focusflow::config::CoreConfig;
use focusflow::sharing::{
    ActivityWarning, PendingInvitation, ShareEntry, SharedTask, SharingError,
};
use focusflow_proto::activity::ActivityRecord;
use focusflow_proto::ids::{ShareId, TaskId, UserId};
use focusflow_proto::share::{EffectivePermission, PermissionLevel, Share, ShareDecision};
use focusflow_proto::task::{NewTask, Task, TaskPatch, TaskStatus};
use focusflow_proto::user::UserProfile;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::feed;

/// Header carrying the caller's user id.
pub const USER_HEADER: &str = "x-user-id";

/// Shared server state: the sharing core over the in-memory backend.
pub struct ServerState {
    /// The composed sharing services.
    pub app: App<MemoryBackend>,
}

impl ServerState {
    /// Builds the state with a fresh backend sized from `config`.
    ///
    /// Returns the state and the receiver for activity-log warnings.
    #[must_use]
    pub fn new(config: CoreConfig) -> (Self, mpsc::Receiver<ActivityWarning>) {
        let backend = Arc::new(MemoryBackend::with_feed_capacity(config.feed_capacity));
        let (app, warnings) = App::new(backend, config);
        (Self { app }, warnings)
    }

    /// The backing store.
    #[must_use]
    pub fn backend(&self) -> &MemoryBackend {
        self.app.backend()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error returned by every handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing, malformed or unknown `x-user-id`.
    #[error("missing or unknown {USER_HEADER} header")]
    Unauthenticated,

    /// A sharing operation failed.
    #[error(transparent)]
    Sharing(#[from] SharingError),
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        Self::Sharing(err.into())
    }
}

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Text suitable for showing to the user.
    pub error: String,
    /// Developer-facing detail.
    pub detail: String,
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Sharing(err) => match err {
                SharingError::NotFound(_) => StatusCode::NOT_FOUND,
                SharingError::Forbidden(_) => StatusCode::FORBIDDEN,
                SharingError::InvalidState { .. } | SharingError::Conflict(_) => {
                    StatusCode::CONFLICT
                }
                SharingError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                SharingError::Busy => StatusCode::TOO_MANY_REQUESTS,
                SharingError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            Self::Unauthenticated => "Please sign in.".to_string(),
            Self::Sharing(err) => err.user_message(),
        };
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "request refused");
        }
        let body = ErrorBody {
            error,
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

/// The authenticated caller, taken from the `x-user-id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

impl FromRequestParts<Arc<ServerState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ServerState>,
    ) -> Result<Self, Self::Rejection> {
        let id: UserId = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .ok_or(ApiError::Unauthenticated)?;
        match state.backend().get_profile(&id).await? {
            Some(_) => Ok(Self(id)),
            None => Err(ApiError::Unauthenticated),
        }
    }
}

// ---------------------------------------------------------------------------
// Request and response bodies
// ---------------------------------------------------------------------------

/// `POST /users` body.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterUser {
    /// Unique e-mail address.
    pub email: String,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
}

/// `GET /tasks/{id}` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskView {
    /// The task.
    pub task: Task,
    /// The caller's access to it.
    pub permission: EffectivePermission,
}

/// `PATCH /tasks/{id}/status` body.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// New status.
    pub status: TaskStatus,
}

/// `GET /tasks/{id}/permission` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionView {
    /// The caller's effective permission.
    pub permission: EffectivePermission,
    /// Whether the caller may change task data.
    pub can_mutate: bool,
    /// Whether the caller may use the task's assistant.
    pub can_chat: bool,
}

/// `POST /tasks/{id}/shares` body.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateShare {
    /// E-mail of the user to share with.
    pub email: String,
    /// Level to grant.
    pub permission: PermissionLevel,
}

/// `PUT /tasks/{id}/shares/{grantee}` body.
#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionUpdate {
    /// New level.
    pub permission: PermissionLevel,
}

/// `POST /shares/{id}/respond` body.
#[derive(Debug, Serialize, Deserialize)]
pub struct Respond {
    /// Accept or reject.
    pub decision: ShareDecision,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

type Shared = State<Arc<ServerState>>;

async fn register_user(
    State(state): Shared,
    Json(body): Json<RegisterUser>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    if body.email.trim().is_empty() {
        return Err(SharingError::InvalidRequest("email is required".to_string()).into());
    }
    let profile = state.backend().register_user(&body.email, body.name).await?;
    tracing::info!(user_id = %profile.id, "user registered");
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn list_tasks(State(state): Shared, Caller(caller): Caller) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(state.app.tasks().list_own_tasks(caller).await?))
}

async fn create_task(
    State(state): Shared,
    Caller(caller): Caller,
    Json(body): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let task = state.app.tasks().create_task(caller, body).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): Shared,
    Caller(caller): Caller,
    Path(task_id): Path<TaskId>,
) -> Result<Json<TaskView>, ApiError> {
    let (task, permission) = state.app.tasks().get_task(caller, task_id).await?;
    Ok(Json(TaskView { task, permission }))
}

async fn update_task(
    State(state): Shared,
    Caller(caller): Caller,
    Path(task_id): Path<TaskId>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(
        state
            .app
            .tasks()
            .update_details(caller, task_id, patch)
            .await?,
    ))
}

async fn delete_task(
    State(state): Shared,
    Caller(caller): Caller,
    Path(task_id): Path<TaskId>,
) -> Result<StatusCode, ApiError> {
    state.app.tasks().delete_task(caller, task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_status(
    State(state): Shared,
    Caller(caller): Caller,
    Path(task_id): Path<TaskId>,
    Json(body): Json<StatusUpdate>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(
        state
            .app
            .tasks()
            .update_status(caller, task_id, body.status)
            .await?,
    ))
}

async fn get_permission(
    State(state): Shared,
    Caller(caller): Caller,
    Path(task_id): Path<TaskId>,
) -> Result<Json<PermissionView>, ApiError> {
    let (_, permission) = state.app.access().permission_for(task_id, caller).await?;
    Ok(Json(PermissionView {
        permission,
        can_mutate: permission.can_mutate(),
        can_chat: permission.can_chat(),
    }))
}

async fn list_shares(
    State(state): Shared,
    Caller(caller): Caller,
    Path(task_id): Path<TaskId>,
) -> Result<Json<Vec<ShareEntry>>, ApiError> {
    Ok(Json(state.app.ledger().list_shares(caller, task_id).await?))
}

async fn create_share(
    State(state): Shared,
    Caller(caller): Caller,
    Path(task_id): Path<TaskId>,
    Json(body): Json<CreateShare>,
) -> Result<(StatusCode, Json<Share>), ApiError> {
    let share = state
        .app
        .ledger()
        .create_share(caller, task_id, &body.email, body.permission)
        .await?;
    Ok((StatusCode::CREATED, Json(share)))
}

async fn update_share(
    State(state): Shared,
    Caller(caller): Caller,
    Path((task_id, grantee)): Path<(TaskId, UserId)>,
    Json(body): Json<PermissionUpdate>,
) -> Result<Json<Share>, ApiError> {
    Ok(Json(
        state
            .app
            .ledger()
            .update_permission(caller, task_id, grantee, body.permission)
            .await?,
    ))
}

async fn revoke_share(
    State(state): Shared,
    Caller(caller): Caller,
    Path((task_id, grantee)): Path<(TaskId, UserId)>,
) -> Result<StatusCode, ApiError> {
    // Revoking a share that is already gone succeeds.
    state.app.ledger().revoke(caller, task_id, grantee).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn respond(
    State(state): Shared,
    Caller(caller): Caller,
    Path(share_id): Path<ShareId>,
    Json(body): Json<Respond>,
) -> Result<Json<Share>, ApiError> {
    Ok(Json(
        state
            .app
            .workflow()
            .respond(caller, share_id, body.decision)
            .await?,
    ))
}

async fn my_invitations(
    State(state): Shared,
    Caller(caller): Caller,
) -> Result<Json<Vec<PendingInvitation>>, ApiError> {
    Ok(Json(state.app.views_for(caller).pending_invitations().await?))
}

async fn my_shared(
    State(state): Shared,
    Caller(caller): Caller,
) -> Result<Json<Vec<SharedTask>>, ApiError> {
    Ok(Json(state.app.views_for(caller).shared_with_me().await?))
}

async fn my_grants(
    State(state): Shared,
    Caller(caller): Caller,
) -> Result<Json<Vec<Share>>, ApiError> {
    Ok(Json(state.app.ledger().find_shares_for_owner(caller).await?))
}

async fn list_activity(
    State(state): Shared,
    Caller(caller): Caller,
    Path(task_id): Path<TaskId>,
) -> Result<Json<Vec<ActivityRecord>>, ApiError> {
    state.app.access().require_view(task_id, caller).await?;
    Ok(Json(state.backend().activity_for_task(&task_id).await?))
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Builds the router over `state`.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/users", post(register_user))
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/tasks/{id}/status", patch(update_status))
        .route("/tasks/{id}/permission", get(get_permission))
        .route("/tasks/{id}/shares", get(list_shares).post(create_share))
        .route(
            "/tasks/{id}/shares/{grantee}",
            put(update_share).delete(revoke_share),
        )
        .route("/tasks/{id}/activity", get(list_activity))
        .route("/shares/{id}/respond", post(respond))
        .route("/me/invitations", get(my_invitations))
        .route("/me/shared", get(my_shared))
        .route("/me/shares", get(my_grants))
        .route("/ws", get(feed::ws_handler))
        .with_state(state)
}

/// Starts the server with a pre-built [`ServerState`] and returns the bound
/// address and a join handle.
///
/// This is the entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}
