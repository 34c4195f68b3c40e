//! Callback registration endpoints.

use axum::{
    Json,
    extract::{Path, State},
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::CurrentUser;
use crate::callback::CallbackRegistration;

pub async fn list_callbacks(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<CallbackRegistration>>> {
    let mut registrations = state.callbacks.list().await?;
    if !user.0.is_admin() {
        // Scope through the parent session's creator.
        let mut visible = Vec::new();
        for registration in registrations {
            if let Ok(parent) = state.sessions.get(&registration.parent_session_id).await {
                if user.0.can_access(&parent.created_by) {
                    visible.push(registration);
                }
            }
        }
        registrations = visible;
    }
    Ok(Json(registrations))
}

pub async fn cancel_callback(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(callback_id): Path<String>,
) -> ApiResult<Json<CallbackRegistration>> {
    if !user.0.is_admin() {
        let registrations = state.callbacks.list().await?;
        let registration = registrations
            .iter()
            .find(|r| r.callback_id == callback_id)
            .ok_or_else(|| ApiError::not_found(format!("callback {callback_id}")))?;
        let parent = state.sessions.get(&registration.parent_session_id).await?;
        if !user.0.can_access(&parent.created_by) {
            return Err(ApiError::forbidden("not your callback"));
        }
    }
    let registration = state.callbacks.cancel(&callback_id).await?;
    Ok(Json(registration))
}
