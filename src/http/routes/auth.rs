use axum::http::StatusCode;
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::Deserialize;

use crate::application::session::SessionTracker;
use crate::domain::auth::AuthGateway;
use crate::domain::error::TaskError;
use crate::http::types::ApiError;

pub struct AuthState<A: AuthGateway> {
    pub session: SessionTracker<A>,
}

impl<A: AuthGateway> Clone for AuthState<A> {
    fn clone(&self) -> Self {
        Self { session: self.session.clone() }
    }
}

pub fn router<A: AuthGateway>(state: AuthState<A>) -> Router {
    Router::new()
        .route("/auth/sign-up", post(sign_up::<A>))
        .route("/auth/sign-in", post(sign_in::<A>))
        .route("/auth/token", post(sign_in_with_token::<A>))
        .route("/auth/sign-out", post(sign_out::<A>))
        .route("/auth/me", get(me::<A>))
        .with_state(state)
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct TokenBody {
    id_token: String,
}

async fn sign_up<A: AuthGateway>(
    State(state): State<AuthState<A>>,
    Json(body): Json<Credentials>,
) -> Result<StatusCode, ApiError> {
    state.session.gateway().sign_up_with_password(&body.email, &body.password).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sign_in<A: AuthGateway>(
    State(state): State<AuthState<A>>,
    Json(body): Json<Credentials>,
) -> Result<StatusCode, ApiError> {
    state.session.gateway().sign_in_with_password(&body.email, &body.password).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sign_in_with_token<A: AuthGateway>(
    State(state): State<AuthState<A>>,
    Json(body): Json<TokenBody>,
) -> Result<StatusCode, ApiError> {
    state.session.gateway().sign_in_with_token(&body.id_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sign_out<A: AuthGateway>(
    State(state): State<AuthState<A>>,
) -> Result<StatusCode, ApiError> {
    state.session.gateway().sign_out().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me<A: AuthGateway>(
    State(state): State<AuthState<A>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.session.current() {
        Some(identity) => Ok(Json(serde_json::json!({
            "uid": identity.uid,
            "email": identity.email,
            "display_name": identity.display_name,
        }))),
        None => Err(TaskError::NotAuthenticated.into()),
    }
}
