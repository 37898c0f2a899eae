use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use parley_session::SessionContext;
use parley_types::api::{ErrorBody, RefreshRequest, RefreshResponse};

use crate::error::{ApiError, Result};
use crate::refresh::{RefreshCoordinator, RefreshError, TokenRefresher};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to the chat REST API. Cheap to clone; clones share the session and
/// the refresh gate.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: Client,
    base: Url,
    tokens: RefreshCoordinator<HttpRefresher>,
}

/// Calls `token/refresh/` with the stored refresh token.
pub struct HttpRefresher {
    http: Client,
    endpoint: Url,
}

impl TokenRefresher for HttpRefresher {
    async fn refresh(&self, refresh_token: &str) -> std::result::Result<RefreshResponse, RefreshError> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(&RefreshRequest {
                refresh: refresh_token.to_string(),
            })
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<RefreshResponse>()
                .await
                .map_err(|e| RefreshError::Transport(e.to_string()));
        }

        let message = error_message(resp).await;
        if status.is_client_error() {
            Err(RefreshError::Rejected(message))
        } else {
            Err(RefreshError::Transport(format!("{}: {}", status, message)))
        }
    }
}

/// Parse a base URL, making sure relative joins land under its path.
pub fn parse_base_url(raw: &str) -> std::result::Result<Url, url::ParseError> {
    let mut s = raw.trim().to_string();
    if !s.ends_with('/') {
        s.push('/');
    }
    Url::parse(&s)
}

impl ApiClient {
    pub fn new(base_url: &str, session: SessionContext) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base = parse_base_url(base_url)?;
        let refresher = HttpRefresher {
            http: http.clone(),
            endpoint: base.join("token/refresh/")?,
        };

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base,
                tokens: RefreshCoordinator::new(session, refresher),
            }),
        })
    }

    pub fn session(&self) -> &SessionContext {
        self.inner.tokens.session()
    }

    pub fn tokens(&self) -> &RefreshCoordinator<HttpRefresher> {
        &self.inner.tokens
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base
    }

    /// A currently valid access token, e.g. for authenticating a WebSocket.
    pub async fn access_token(&self) -> Result<String> {
        self.ensure_session()?;
        Ok(self.inner.tokens.access_token().await?)
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        Ok(self.inner.base.join(path)?)
    }

    pub(crate) fn http(&self) -> &Client {
        &self.inner.http
    }

    /// Send a request that needs no credentials.
    pub(crate) async fn execute_public(&self, req: RequestBuilder) -> Result<Response> {
        let resp = req.send().await?;
        check(resp).await
    }

    /// Send an authorized request.
    ///
    /// `build` is called once per attempt so bodies that cannot be cloned
    /// (multipart forms) are rebuilt for the retry. A 401 triggers one refresh
    /// keyed by the token that was rejected and one retry; a second 401 ends
    /// the session.
    pub(crate) async fn execute<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.ensure_session()?;
        let tokens = &self.inner.tokens;

        let token = tokens.access_token().await?;
        let resp = build(&self.inner.http).bearer_auth(&token).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return check(resp).await;
        }

        debug!("Request unauthorized, refreshing before retry");
        let fresh = tokens.refresh_after_unauthorized(&token).await?;
        let resp = build(&self.inner.http).bearer_auth(&fresh).send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            warn!("Retried request still unauthorized");
            self.session().invalidate();
            return Err(ApiError::LoginRequired);
        }
        check(resp).await
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        let resp = self.execute(|http| http.get(url.clone())).await?;
        Ok(resp.json::<T>().await?)
    }

    fn ensure_session(&self) -> Result<()> {
        if self.session().refresh_token().is_none() {
            return Err(ApiError::LoginRequired);
        }
        Ok(())
    }
}

async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = error_message(resp).await;
    Err(ApiError::Status { status, message })
}

/// Best human-readable text from an error response.
async fn error_message(resp: Response) -> String {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|body| body.message())
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                text.chars().take(200).collect()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let base = parse_base_url("http://127.0.0.1:8000/api").unwrap();
        assert_eq!(
            base.join("messages/4/").unwrap().as_str(),
            "http://127.0.0.1:8000/api/messages/4/"
        );
        let same = parse_base_url(" http://127.0.0.1:8000/api/ ").unwrap();
        assert_eq!(base, same);
    }
}
