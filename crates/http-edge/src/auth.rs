//! Authenticating `poem::Middleware`, the supplemented HTTP analogue of the
//! source's `lib/auth/account.go`: forwards the caller's bearer token to the
//! account service's `/info` endpoint and only lets the request through if
//! the returned account ID is on the configured allow-list.

use std::collections::HashSet;
use std::sync::Arc;

use poem::http::StatusCode;
use poem::{Endpoint, IntoResponse, Middleware, Request, Response, Result};
use tracing::trace;

#[derive(Clone)]
pub struct AuthConfig {
    pub account_info_url: url::Url,
    pub allowed_accounts: HashSet<String>,
}

#[derive(Clone)]
pub struct WithAuth {
    config: Arc<AuthConfig>,
    http: reqwest::Client,
}

impl WithAuth {
    pub fn new(config: AuthConfig) -> Self {
        Self { config: Arc::new(config), http: reqwest::Client::new() }
    }
}

impl<E: Endpoint> Middleware<E> for WithAuth {
    type Output = WithAuthEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        WithAuthEndpoint { inner: ep, config: self.config.clone(), http: self.http.clone() }
    }
}

pub struct WithAuthEndpoint<E> {
    inner: E,
    config: Arc<AuthConfig>,
    http: reqwest::Client,
}

#[derive(serde::Deserialize)]
struct AccountInfo {
    #[serde(rename = "accountId")]
    account_id: String,
}

impl<E: Endpoint> WithAuthEndpoint<E> {
    async fn authorize(&self, authorization: &str) -> Result<()> {
        let response = self
            .http
            .get(self.config.account_info_url.clone())
            .header("authorization", authorization)
            .send()
            .await
            .map_err(|e| poem::Error::from_string(e.to_string(), StatusCode::BAD_GATEWAY))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            trace!(%status, "account service rejected token");
            return Err(poem::Error::from_string(body, StatusCode::UNAUTHORIZED));
        }

        let info: AccountInfo = response
            .json()
            .await
            .map_err(|e| poem::Error::from_string(e.to_string(), StatusCode::UNAUTHORIZED))?;
        if !self.config.allowed_accounts.contains(&info.account_id) {
            return Err(poem::Error::from_string(
                format!("account {:?} is not authorized", info.account_id),
                StatusCode::UNAUTHORIZED,
            ));
        }
        Ok(())
    }
}

#[poem::async_trait]
impl<E: Endpoint> Endpoint for WithAuthEndpoint<E> {
    type Output = Response;

    async fn call(&self, req: Request) -> Result<Self::Output> {
        let authorization = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let Some(authorization) = authorization else {
            return Err(poem::Error::from_string(
                "missing authorization header",
                StatusCode::UNAUTHORIZED,
            ));
        };

        self.authorize(&authorization).await?;
        self.inner.call(req).await.map(IntoResponse::into_response)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use poem::{handler, EndpointExt, Route};
    use poem::test::TestClient;

    #[handler]
    fn ok() -> &'static str {
        "ok"
    }

    fn config(server_url: &str, allowed: &[&str]) -> AuthConfig {
        AuthConfig {
            account_info_url: url::Url::parse(&format!("{server_url}/info")).unwrap(),
            allowed_accounts: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let app = Route::new().at("/", ok).with(WithAuth::new(config("http://127.0.0.1:0", &["acct-1"])));
        let client = TestClient::new(app);
        let resp = client.get("/").send().await;
        resp.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_account_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/info")
            .with_status(200)
            .with_body(r#"{"accountId":"stranger","otherAccountIds":[]}"#)
            .create_async()
            .await;
        let app = Route::new().at("/", ok).with(WithAuth::new(config(&server.url(), &["acct-1"])));
        let client = TestClient::new(app);
        let resp = client.get("/").header("authorization", "Bearer x").send().await;
        resp.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn allowed_account_passes_through() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/info")
            .with_status(200)
            .with_body(r#"{"accountId":"acct-1","otherAccountIds":["acct-2"]}"#)
            .create_async()
            .await;
        let app = Route::new().at("/", ok).with(WithAuth::new(config(&server.url(), &["acct-1"])));
        let client = TestClient::new(app);
        let resp = client.get("/").header("authorization", "Bearer x").send().await;
        resp.assert_status_is_ok();
        resp.assert_text("ok").await;
    }
}
