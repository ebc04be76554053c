//! Users-related HTTP API.
mod check;
mod get;
mod password;
mod photo;
mod recovery;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Router, middleware};

use crate::AppState;

/// Room left for multipart boundaries and headers.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn router(state: AppState) -> Router<AppState> {
    let upload_limit =
        state.config.photo.upload_max_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        // `GET /users/@me` goes to `get`. Authorization required.
        .route("/@me", get(get::handler))
        // `POST /users/@me/password` goes to `password`. Authorization required.
        .route("/@me/password", post(password::handler))
        // `POST /users/@me/photo` goes to `photo`. Authorization required.
        .route(
            "/@me/photo",
            post(photo::handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/@me/recovery-email",
            get(recovery::get)
                .post(recovery::create)
                .put(recovery::update),
        )
        .route_layer(middleware::from_fn_with_state(state, super::auth))
        // `POST /users/check` goes to `check`.
        .route("/check", post(check::handler))
}
