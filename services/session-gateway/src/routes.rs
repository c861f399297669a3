//! Session HTTP surface
//!
//! | method | path           | result                                       |
//! |--------|----------------|----------------------------------------------|
//! | GET    | `/authorize`   | 303 to the Bungie authorize page             |
//! | GET    | `/callback`    | 303 to the return URL, `error=` on failure   |
//! | GET    | `/session`     | 200 with the derived session payload         |
//! | POST   | `/refresh`     | forced derivation, status from the payload   |
//! | POST   | `/deauthorize` | 200 `unauthorized`, all cookies cleared      |
//!
//! Every response carries the cookie mutations the engine made and an
//! `x-request-id` header.

use std::time::Instant;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use bungie_session::{CallbackOutcome, CallbackParams, SessionView};
use serde::Deserialize;
use tracing::{Span, debug, field, info, instrument};

use crate::AppState;
use crate::jar::JarStore;

#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeParams {
    /// Where to land after the callback.
    pub callback: Option<String>,
}

fn new_request_id() -> String {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    Span::current().record("request_id", field::display(&request_id));
    request_id
}

fn store(state: &AppState, jar: CookieJar) -> JarStore {
    JarStore::new(jar, &state.engine.settings().cookie_options.path)
}

/// Attach the request id and count the request.
fn finish(
    state: &AppState,
    route: &'static str,
    started: Instant,
    request_id: &str,
    response: impl IntoResponse,
) -> Response {
    let mut response = response.into_response();
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    state.metrics.record_request(
        route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

fn session_response(view: SessionView, status: StatusCode) -> (StatusCode, Json<SessionView>) {
    (status, Json(view))
}

#[instrument(skip_all, fields(request_id = field::Empty))]
pub async fn authorize(
    State(state): State<AppState>,
    Query(params): Query<AuthorizeParams>,
    jar: CookieJar,
) -> Response {
    let started = Instant::now();
    let request_id = new_request_id();

    let mut store = store(&state, jar);
    let url = state
        .engine
        .begin_authorize(&mut store, params.callback.as_deref());
    debug!("redirecting to provider");

    let response = (store.into_jar(), Redirect::to(url.as_str()));
    finish(&state, "authorize", started, &request_id, response)
}

#[instrument(skip_all, fields(request_id = field::Empty))]
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Response {
    let started = Instant::now();
    let request_id = new_request_id();

    let mut store = store(&state, jar);
    let outcome = state.engine.complete_callback(&mut store, params).await;
    if let CallbackOutcome::Authorized { membership_id, .. } = &outcome {
        info!(%membership_id, "callback authorized");
    }

    let response = (store.into_jar(), Redirect::to(outcome.location()));
    finish(&state, "callback", started, &request_id, response)
}

#[instrument(skip_all, fields(request_id = field::Empty))]
pub async fn session(State(state): State<AppState>, jar: CookieJar) -> Response {
    let started = Instant::now();
    let request_id = new_request_id();

    let mut store = store(&state, jar);
    let view = state.engine.derive(&mut store, false).await;
    debug!(status = view.status().as_str(), "session derived");

    let response = (store.into_jar(), session_response(view, StatusCode::OK));
    finish(&state, "session", started, &request_id, response)
}

#[instrument(skip_all, fields(request_id = field::Empty))]
pub async fn refresh(State(state): State<AppState>, jar: CookieJar) -> Response {
    let started = Instant::now();
    let request_id = new_request_id();

    let mut store = store(&state, jar);
    let view = state.engine.derive(&mut store, true).await;
    let status =
        StatusCode::from_u16(view.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    debug!(status = view.status().as_str(), "session refreshed on request");

    let response = (store.into_jar(), session_response(view, status));
    finish(&state, "refresh", started, &request_id, response)
}

#[instrument(skip_all, fields(request_id = field::Empty))]
pub async fn deauthorize(State(state): State<AppState>, jar: CookieJar) -> Response {
    let started = Instant::now();
    let request_id = new_request_id();

    let mut store = store(&state, jar);
    let view = state.engine.deauthorize(&mut store);

    let response = (store.into_jar(), session_response(view, StatusCode::OK));
    finish(&state, "deauthorize", started, &request_id, response)
}
