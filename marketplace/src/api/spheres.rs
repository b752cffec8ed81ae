use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;

use super::{JsonBody, PathParam};
use crate::{auth::AuthContext, error::AppError, server::AppState, spheres::SphereForm};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMember {
    #[serde(alias = "user_id")]
    user_id: Option<i64>,
}

async fn create_sphere(
    State(state): State<AppState>,
    ctx: AuthContext,
    JsonBody(form): JsonBody<SphereForm>,
) -> Result<impl IntoResponse, AppError> {
    let sphere = state.spheres.create(ctx.user_id, form).await?;
    Ok((StatusCode::CREATED, Json(sphere)))
}

async fn show_sphere(
    State(state): State<AppState>,
    _ctx: AuthContext,
    PathParam(id): PathParam<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.spheres.show(id).await?))
}

async fn add_member(
    State(state): State<AppState>,
    ctx: AuthContext,
    PathParam(id): PathParam<i64>,
    JsonBody(body): JsonBody<NewMember>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = body.user_id.ok_or_else(|| AppError::validation("User is required."))?;
    Ok(Json(state.spheres.add_member(id, ctx.user_id, user_id).await?))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/spheres", post(create_sphere))
        .route("/spheres/{id}", get(show_sphere))
        .route("/spheres/{id}/members", post(add_member))
}
