//! SSE event stream with resume-by-id.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::CurrentUser;
use crate::broadcast::{Envelope, SubscriberFilter, parse_marker};
use crate::session::SessionFilter;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub session_id: Option<String>,
    /// Send an `init` snapshot on plain connects. Resumes never get one
    /// unless their marker has aged out of the replay buffer.
    #[serde(default = "default_true")]
    pub include_init: bool,
}

fn default_true() -> bool {
    true
}

fn to_sse_event(envelope: &Envelope) -> Result<Event, Infallible> {
    let data = serde_json::to_string(&envelope.message)
        .unwrap_or_else(|_| r#"{"type":"error"}"#.to_string());
    Ok(Event::default().id(envelope.id.to_string()).data(data))
}

pub async fn session_stream(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Narrowing to a session requires the right to see it.
    if let Some(session_id) = &query.session_id {
        let session = state.sessions.get(session_id).await?;
        if !user.0.can_access(&session.created_by) {
            return Err(ApiError::forbidden("not your session"));
        }
    }

    let filter = SubscriberFilter::new(&user.0, query.session_id.clone());
    let mut subscription = state.broadcaster.subscribe(filter.clone());
    let rx = subscription.take_rx();

    let last_event_id = headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    // Resume replays everything after the marker; an aged-out marker (or a
    // plain connect with include_init) gets a fresh snapshot instead.
    let mut backlog: Vec<Arc<Envelope>> = Vec::new();
    let replayed = match last_event_id.as_deref().and_then(parse_marker) {
        Some(marker) => match state.broadcaster.replay_since(marker, &filter) {
            Some(envelopes) => {
                backlog = envelopes;
                true
            }
            None => false,
        },
        None => false,
    };

    if !replayed && (query.include_init || last_event_id.is_some()) {
        let sessions = state
            .sessions
            .list(&SessionFilter {
                created_by: if user.0.is_admin() {
                    None
                } else {
                    Some(user.0.user.clone())
                },
                status: None,
                agent_name: None,
            })
            .await?;
        let sessions = match &query.session_id {
            Some(session_id) => sessions
                .into_iter()
                .filter(|s| s.session_id == *session_id)
                .collect(),
            None => sessions,
        };
        backlog.insert(0, Arc::new(state.broadcaster.init_envelope(sessions)));
    }

    let initial = futures::stream::iter(
        backlog
            .into_iter()
            .map(move |envelope| to_sse_event(&envelope)),
    );
    let live = ReceiverStream::new(rx).map(move |envelope| {
        // The subscription is the drop guard; it lives as long as the
        // stream does.
        let _guard = &subscription;
        to_sse_event(&envelope)
    });

    Ok(Sse::new(initial.chain(live)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    ))
}
