use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Extension,
};
use chrono::Utc;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use super::error::ApiError;
use crate::{
    metrics::SSE_CONNECTIONS_ACTIVE,
    middlewares::auth::JwtClaims,
    models::{
        timer::{TimeExpired, TimerEvent, TimerTick},
        SessionStatus,
    },
    services::{session_service::SessionService, AppState},
};

/// Keeps the active-connection gauge in step with live streams.
struct ConnectionGuard;

impl ConnectionGuard {
    fn open() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        ConnectionGuard
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
    }
}

struct StreamState {
    app: Arc<AppState>,
    session_id: String,
    user_id: String,
    opened_at: Instant,
    first: bool,
    finished: bool,
    _guard: ConnectionGuard,
}

/// SSE endpoint for the session timer
/// GET /api/v1/sessions/{id}/stream
pub async fn session_stream(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Ownership and existence are checked before the stream opens
    SessionService::new(&state)
        .load(&session_id, &claims.sub, Utc::now())
        .await?;

    tracing::info!(
        "Starting SSE stream: session={}, tick_interval={}ms, max_duration={}s",
        session_id,
        state.config.sse.tick_interval_ms,
        state.config.sse.max_stream_seconds
    );

    let stream = timer_stream(StreamState {
        app: state,
        session_id,
        user_id: claims.sub,
        opened_at: Instant::now(),
        first: true,
        finished: false,
        _guard: ConnectionGuard::open(),
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(timer_event: &TimerEvent) -> Event {
    Event::default()
        .event(timer_event.event_name())
        .data(timer_event.to_sse_data())
}

/// Ticks until the countdown runs out, the session ends or the stream
/// reaches its maximum duration. Each tick re-reads the cached session so
/// navigation and completion are reflected.
fn timer_stream(initial: StreamState) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(initial, |mut st| async move {
        if st.finished {
            return None;
        }

        let tick = Duration::from_millis(st.app.config.sse.tick_interval_ms);
        if !st.first {
            sleep(tick).await;
        }
        st.first = false;

        if st.opened_at.elapsed() >= Duration::from_secs(st.app.config.sse.max_stream_seconds) {
            tracing::info!("SSE stream reached max duration: session={}", st.session_id);
            return None;
        }

        let now = Utc::now();
        let session = match SessionService::new(&st.app)
            .load(&st.session_id, &st.user_id, now)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!("Closing SSE stream: session={}, reason={}", st.session_id, e);
                return None;
            }
        };

        match session.status {
            SessionStatus::Expired => {
                let expired = TimerEvent::TimeExpired(TimeExpired {
                    session_id: st.session_id.clone(),
                    timestamp: now,
                    message: "Time limit exceeded".to_string(),
                });
                tracing::info!("Timer expired: session={}", st.session_id);
                st.finished = true;
                Some((Ok(sse_event(&expired)), st))
            }
            SessionStatus::Completed | SessionStatus::Abandoned => None,
            SessionStatus::Active => {
                let tick_event = TimerEvent::TimerTick(TimerTick {
                    session_id: st.session_id.clone(),
                    elapsed_seconds: session.clock.elapsed_seconds(now),
                    question_elapsed_seconds: session.clock.question_elapsed_seconds(now),
                    remaining_seconds: session.clock.remaining_seconds(now),
                    timestamp: now,
                });
                Some((Ok(sse_event(&tick_event)), st))
            }
        }
    })
}
