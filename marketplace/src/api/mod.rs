//! JSON API Handlers
//!
//! - `/requests`, `/exchanges` and `/trading` drive the request/exchange lifecycle
//! - `/inventory` and `/benefits` serve analytics
//! - `/spheres` manages community groups
//!
//! Every route except the community overview needs a session. Failures are
//! returned as `{ "error": ..., "details"?: [...] }`.

mod analytics;
mod lifecycle;
mod spheres;

use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, rejection::JsonRejection},
    http::request::Parts,
};
use serde::de::DeserializeOwned;

use crate::{error::AppError, server::AppState};

/// `Json` whose rejection is a validation error in the API error shape.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::validation(e.body_text()))?;
        Ok(Self(value))
    }
}

/// `Path` whose rejection (`/exchanges/abc`) is a validation error.
pub struct PathParam<T>(pub T);

impl<S, T> FromRequestParts<S> for PathParam<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::validation(e.body_text()))?;
        Ok(Self(value))
    }
}

/// `Query` with the same rejection handling.
pub struct QueryParams<T>(pub T);

impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::validation(e.body_text()))?;
        Ok(Self(value))
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(lifecycle::routes())
        .merge(analytics::routes())
        .merge(spheres::routes())
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::server::fixtures::*;

    #[tokio::test]
    async fn api_requires_a_session() {
        let app = TestApp::new().await;
        let response = app.send(get("/requests", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "Authentication required");
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_error() {
        let app = TestApp::new().await;
        let cookie = app.sign_in("alice").await;
        let mut request = json_request(Method::POST, "/requests", Some(&cookie), json!({}));
        *request.body_mut() = axum::body::Body::from("{not json");

        let response = app.send(request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Validation failed");
        assert_eq!(body["details"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn bad_path_ids_use_the_error_shape() {
        let app = TestApp::new().await;
        let cookie = app.sign_in("alice").await;

        for uri in ["/exchanges/abc", "/trading/abc", "/requests/1x", "/spheres/none"] {
            let response = app.send(get(uri, Some(&cookie))).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            let body = body_json(response).await;
            assert_eq!(body["error"], "Validation failed", "{uri}");
            assert_eq!(body["details"].as_array().map(Vec::len), Some(1), "{uri}");
        }
    }

    #[tokio::test]
    async fn bad_query_values_use_the_error_shape() {
        let app = TestApp::new().await;
        let cookie = app.sign_in("alice").await;

        let response = app.send(get("/exchanges?type=1&type=2", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Validation failed");
    }
}
