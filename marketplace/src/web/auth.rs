use askama::Template;
use axum::{
    Form, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::info;

use super::{HtmlTemplate, PageError, SIGN_IN};
use crate::{
    auth::{
        AuthContext,
        session::{expired_session_cookie, session_cookie, session_id_from_headers},
    },
    error::AppError,
    server::AppState,
    validation::{RegisterForm, validate_registration},
};

#[derive(Template, Default)]
#[template(path = "auth/sign_up.html")]
struct SignUpTemplate {
    viewer: Option<String>,
    errors: Vec<String>,
    username: String,
    email: String,
}

#[derive(Template, Default)]
#[template(path = "auth/sign_in.html")]
struct SignInTemplate {
    viewer: Option<String>,
    errors: Vec<String>,
    username: String,
}

#[derive(Debug, Default, Deserialize)]
struct SignInForm {
    username: Option<String>,
    password: Option<String>,
}

fn viewer(ctx: Option<AuthContext>) -> Option<String> {
    ctx.map(|c| c.username)
}

async fn sign_up_page(ctx: Option<AuthContext>) -> impl IntoResponse {
    HtmlTemplate(SignUpTemplate {
        viewer: viewer(ctx),
        ..Default::default()
    })
}

async fn sign_up(State(state): State<AppState>, Form(form): Form<RegisterForm>) -> Response {
    let result = match validate_registration(&form) {
        Ok(account) => state.accounts.register(account).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(_) => Redirect::to(SIGN_IN).into_response(),
        Err(e) if e.status_code().is_client_error() => {
            let page = SignUpTemplate {
                viewer: None,
                errors: e.messages(),
                username: form.username.unwrap_or_default(),
                email: form.email.unwrap_or_default(),
            };
            (e.status_code(), HtmlTemplate(page)).into_response()
        }
        Err(e) => PageError::from(e).into_response(),
    }
}

async fn sign_in_page(ctx: Option<AuthContext>) -> impl IntoResponse {
    HtmlTemplate(SignInTemplate {
        viewer: viewer(ctx),
        ..Default::default()
    })
}

async fn sign_in(State(state): State<AppState>, Form(form): Form<SignInForm>) -> Response {
    let username = form.username.unwrap_or_default();
    let password = form.password.unwrap_or_default();

    match state.accounts.authenticate(&username, &password).await {
        Ok(signed_in) => {
            let cookie = session_cookie(
                &signed_in.session_id,
                state.accounts.sessions().ttl(),
                state.config.secure_cookies,
            );
            ([(header::SET_COOKIE, cookie)], Redirect::to("/items")).into_response()
        }
        Err(AppError::InvalidCredentials) => {
            let page = SignInTemplate {
                viewer: None,
                errors: vec![AppError::InvalidCredentials.to_string()],
                username,
            };
            (StatusCode::UNAUTHORIZED, HtmlTemplate(page)).into_response()
        }
        Err(e) => PageError::from(e).into_response(),
    }
}

async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(id) = session_id_from_headers(&headers) {
        if let Err(e) = state.accounts.sign_out(&id).await {
            return PageError::from(e).into_response();
        }
        info!("User signed out");
    }

    let cookie = expired_session_cookie(state.config.secure_cookies);
    ([(header::SET_COOKIE, cookie)], Redirect::to(SIGN_IN)).into_response()
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/sign-up", get(sign_up_page).post(sign_up))
        .route("/auth/sign-in", get(sign_in_page).post(sign_in))
        .route("/auth/sign-out", get(sign_out))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{self, Method},
    };

    use super::*;
    use crate::{
        auth::session::SESSION_COOKIE,
        server::fixtures::{TestApp, body_text, get},
    };

    fn form(uri: &str, body: &str) -> axum::extract::Request {
        http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn register_then_duplicate_username() {
        let app = TestApp::new().await;

        let response = app
            .send(form("/auth/sign-up", "username=alice&password=p4ss&email=a%40x.com"))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], SIGN_IN);

        let hash: String = sqlx::query_scalar("SELECT password_hash FROM users WHERE username = 'alice'")
            .fetch_one(app.db.pool())
            .await
            .unwrap();
        assert_ne!(hash, "p4ss");

        let response = app
            .send(form("/auth/sign-up", "username=alice&password=p4ss&email=b%40x.com"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let page = body_text(response).await;
        assert!(page.contains("Username already taken"));
        assert!(page.contains("value=\"b@x.com\""));
    }

    #[tokio::test]
    async fn invalid_registration_lists_every_problem() {
        let app = TestApp::new().await;
        let response = app.send(form("/auth/sign-up", "username=al&email=nope")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let page = body_text(response).await;
        assert!(page.contains("Password is required."));
        assert!(page.contains("Please use a valid email address."));
    }

    #[tokio::test]
    async fn sign_in_sets_cookie_and_sign_out_clears_it() {
        let app = TestApp::new().await;
        crate::auth::fixtures::user(&app.state.accounts, "bob").await;

        let response = app.send(form("/auth/sign-in", "username=bob&password=p4ss")).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/items");
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with(&format!("{SESSION_COOKIE}=")));
        assert!(cookie.contains("HttpOnly"));
        assert!(!cookie.contains("Secure"));

        let pair = cookie.split(';').next().unwrap().to_string();
        let response = app.send(get("/items/new", Some(&pair))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.send(get("/auth/sign-out", Some(&pair))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(response.headers()[header::SET_COOKIE].to_str().unwrap().contains("Max-Age=0"));

        let response = app.send(get("/items/new", Some(&pair))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn wrong_password_rerenders_with_generic_message() {
        let app = TestApp::new().await;
        crate::auth::fixtures::user(&app.state.accounts, "bob").await;

        let response = app.send(form("/auth/sign-in", "username=bob&password=nope")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(response).await.contains("Invalid username or password."));
    }
}
