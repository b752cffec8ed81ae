//! Web UI Handlers
//!
//! Server-rendered pages:
//! - `/auth/sign-up`, `/auth/sign-in`, `/auth/sign-out`
//! - `/items` and `/items/...` for the catalog
//!
//! Unauthenticated visitors of a protected page are redirected to the
//! sign-in form; failures render the error page.

mod auth;
mod items;

use askama::Template;
use axum::{
    Router,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{Html, IntoResponse, Redirect, Response},
};

use crate::{auth::AuthContext, error::AppError, server::AppState};

pub const SIGN_IN: &str = "/auth/sign-in";

pub struct HtmlTemplate<T>(pub T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => {
                tracing::error!("Template error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong, please try again later",
                )
                    .into_response()
            }
        }
    }
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate {
    viewer: Option<String>,
    status: u16,
    message: String,
}

/// Renders an `AppError` as a page with the matching status code.
pub struct PageError {
    error: AppError,
    viewer: Option<String>,
}

impl PageError {
    pub fn new(error: AppError, viewer: Option<&AuthContext>) -> Self {
        Self {
            error,
            viewer: viewer.map(|v| v.username.clone()),
        }
    }
}

impl From<AppError> for PageError {
    fn from(error: AppError) -> Self {
        Self { error, viewer: None }
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.error, "Page failed");
        }
        if matches!(self.error, AppError::Unauthenticated) {
            return Redirect::to(SIGN_IN).into_response();
        }

        let page = ErrorTemplate {
            viewer: self.viewer,
            status: status.as_u16(),
            message: self.error.public_message(),
        };
        (status, HtmlTemplate(page)).into_response()
    }
}

/// A signed-in visitor of a page route.
pub struct SignedIn(pub AuthContext);

impl FromRequestParts<AppState> for SignedIn {
    type Rejection = PageError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        <AuthContext as FromRequestParts<AppState>>::from_request_parts(parts, state)
            .await
            .map(SignedIn)
            .map_err(PageError::from)
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().merge(auth::routes()).merge(items::routes())
}
