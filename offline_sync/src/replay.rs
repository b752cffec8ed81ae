use std::time::Duration;

use reqwest::{
    Client, Method,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use tracing::debug;

use crate::{PendingAction, SyncError};

/// Sends one action to the server and reports the HTTP status it got back.
///
/// `Err` means the request never got an answer; the action stays queued.
#[allow(async_fn_in_trait)]
pub trait Replayer {
    async fn replay(&self, action: &PendingAction) -> Result<u16, SyncError>;
}

/// Replays actions with reqwest. Relative URLs are resolved against `base_url`;
/// `cookie`, when set, is sent with every request so queued actions run as
/// the member who made them.
pub struct HttpReplayer {
    client: Client,
    base_url: String,
    cookie: Option<String>,
}

impl HttpReplayer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cookie: None,
        })
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }

    fn headers(&self, action: &PendingAction) -> Result<HeaderMap, SyncError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &action.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SyncError::InvalidAction(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SyncError::InvalidAction(format!("header {}: {}", name, e)))?;
            headers.insert(name, value);
        }
        if let Some(cookie) = &self.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| SyncError::InvalidAction(format!("cookie: {}", e)))?;
            headers.insert(reqwest::header::COOKIE, value);
        }
        Ok(headers)
    }
}

impl Replayer for HttpReplayer {
    async fn replay(&self, action: &PendingAction) -> Result<u16, SyncError> {
        let method = Method::from_bytes(action.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| SyncError::InvalidAction(format!("unknown method {}", action.method)))?;
        let url = self.resolve(&action.url);

        let mut request = self.client.request(method, &url).headers(self.headers(action)?);
        if let Some(body) = &action.body {
            request = request.body(body.clone());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        debug!(url = url.as_str(), status, "Action replayed");
        Ok(status)
    }
}
