//! Authenticated GraphQL client for the remote trace/account services.
//!
//! Mirrors the source's `services/client` package: a reqwest-backed HTTP
//! client that keeps a renewable bearer token, wraps trace and account
//! GraphQL calls, and (for trace calls only) walks the decoded response
//! tree decrypting any link payload addressed to this node.

pub mod error;
pub mod queries;
pub mod reflect;
pub mod token;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use common::Link;
use decryptor::Decryptor;
use k256::ecdsa::signature::Signer;
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::pkcs8::{EncodePublicKey, LineEnding};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

pub use error::TraceClientError;
use token::{exp_of, CachedToken};
use types::{
    CreateLinkResponse, CreateLinksResponse, RecipientPublicKey, RecipientsKeysResponse,
    WorkflowLinksResponse,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const LOGIN_LIFETIME_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct TraceClientConfig {
    pub trace_base: url::Url,
    pub account_base: url::Url,
    pub timeout: Duration,
}

impl TraceClientConfig {
    pub fn new(trace_base: url::Url, account_base: url::Url) -> Self {
        Self { trace_base, account_base, timeout: DEFAULT_TIMEOUT }
    }
}

pub struct TraceClient {
    http: Client,
    trace_base: url::Url,
    account_base: url::Url,
    signing_key: SigningKey,
    verifying_key_pem: String,
    decryptor: Arc<Decryptor>,
    token: Mutex<Option<CachedToken>>,
}

impl TraceClient {
    pub fn new(
        config: TraceClientConfig,
        signing_key: SigningKey,
        decryptor: Arc<Decryptor>,
    ) -> Result<Self, TraceClientError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(TraceClientError::Transport)?;
        let verifying_key_pem = VerifyingKey::from(&signing_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| TraceClientError::Signing(e.to_string()))?;
        Ok(Self {
            http,
            trace_base: config.trace_base,
            account_base: config.account_base,
            signing_key,
            verifying_key_pem,
            decryptor,
            token: Mutex::new(None),
        })
    }

    /// This node's chainscript signing public key, in the form link
    /// signatures and recipient-matching use.
    pub fn public_key_pem(&self) -> &str {
        &self.verifying_key_pem
    }

    /// Ensure a valid bearer token, logging in if the cached one is
    /// missing or within one second of expiry. Serialized through a single
    /// mutex so concurrent callers singleflight the login round trip.
    #[instrument(level = "debug", skip(self))]
    async fn ensure_token(&self) -> Result<String, TraceClientError> {
        let mut guard = self.token.lock().await;
        let now = Utc::now().timestamp();
        let needs_renewal = match guard.as_ref() {
            Some(cached) => cached.is_stale(now),
            None => true,
        };
        if needs_renewal {
            debug!(now, "renewing trace client bearer token");
            *guard = Some(self.login(now).await?);
        }
        Ok(guard.as_ref().expect("just set above").token.clone())
    }

    async fn login(&self, now: i64) -> Result<CachedToken, TraceClientError> {
        let exp = now + LOGIN_LIFETIME_SECS;
        let claims = json!({ "iat": now, "exp": exp });
        let claims_bytes = serde_json::to_vec(&claims)?;
        let signature: Signature = self.signing_key.sign(&claims_bytes);
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

        let url = self
            .account_base
            .join("login")
            .map_err(|e| TraceClientError::Login(e.to_string()))?;
        let response = self
            .http
            .get(url)
            .bearer_auth(sig_b64)
            .send()
            .await
            .map_err(TraceClientError::Transport)?;
        if !response.status().is_success() {
            return Err(TraceClientError::Login(format!("status {}", response.status())));
        }
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            token: String,
        }
        let body: LoginResponse = response.json().await.map_err(TraceClientError::Transport)?;
        let exp = exp_of(&body.token, now);
        Ok(CachedToken { token: body.token, exp })
    }

    #[instrument(level = "debug", skip(self, variables))]
    async fn call_gql<T: DeserializeOwned>(
        &self,
        base: &url::Url,
        query: &str,
        variables: Value,
        decrypt: bool,
    ) -> Result<T, TraceClientError> {
        let token = self.ensure_token().await?;
        let url = base.join("graphql").map_err(|e| TraceClientError::Login(e.to_string()))?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(TraceClientError::Transport)?;
        let status = response.status();
        let envelope: Value = response.json().await.map_err(TraceClientError::Transport)?;

        if let Some(errors) = envelope.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                let message = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                    .collect::<Vec<_>>()
                    .join("; ");
                warn!(%status, %message, "graphql server returned errors");
                return Err(TraceClientError::GraphQl { status: status.as_u16(), message });
            }
        }

        let mut data = envelope.get("data").cloned().unwrap_or(Value::Null);
        if decrypt {
            reflect::walk_and_decrypt(&mut data, &self.decryptor);
        }
        Ok(serde_json::from_value(data)?)
    }

    /// A trace GraphQL call: response links are walked and decrypted.
    pub async fn call_trace_gql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T, TraceClientError> {
        let base = self.trace_base.clone();
        self.call_gql(&base, query, variables, true).await
    }

    /// An account GraphQL call: no response decryption.
    pub async fn call_account_gql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T, TraceClientError> {
        let base = self.account_base.clone();
        self.call_gql(&base, query, variables, false).await
    }

    /// Fetch the current recipient public keys for a workflow.
    pub async fn get_recipients_public_keys(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<RecipientPublicKey>, TraceClientError> {
        let resp: RecipientsKeysResponse = self
            .call_trace_gql(queries::RECIPIENTS_KEYS_QUERY, json!({ "id": workflow_id }))
            .await?;
        let workflow = resp.workflow_by_row_id.ok_or(TraceClientError::WorkflowNotFound)?;
        Ok(workflow.groups.nodes.into_iter().map(|n| n.owner.encryption_key).collect())
    }

    /// Poll a page of links for a workflow, used by Livesync.
    pub async fn workflow_links(
        &self,
        workflow_id: &str,
        after: Option<&str>,
        limit: i32,
    ) -> Result<WorkflowLinksResponse, TraceClientError> {
        self.call_trace_gql(
            queries::WORKFLOW_LINKS_QUERY,
            json!({ "id": workflow_id, "cursor": after, "limit": limit }),
        )
        .await
    }

    /// Sign (unless already signed by this node) and submit a link.
    #[instrument(level = "debug", skip(self, link))]
    pub async fn create_link(&self, mut link: Link) -> Result<CreateLinkResponse, TraceClientError> {
        self.sign_if_needed(&mut link)?;
        self.call_trace_gql(queries::CREATE_LINK_MUTATION, json!({ "link": link })).await
    }

    /// Sign (unless already signed) and submit a batch of links.
    pub async fn create_links(
        &self,
        links: Vec<Link>,
    ) -> Result<CreateLinksResponse, TraceClientError> {
        let mut signed = Vec::with_capacity(links.len());
        for mut link in links {
            self.sign_if_needed(&mut link)?;
            signed.push(link);
        }
        self.call_trace_gql(queries::CREATE_LINKS_MUTATION, json!({ "links": signed })).await
    }

    fn sign_if_needed(&self, link: &mut Link) -> Result<(), TraceClientError> {
        if link.signed_by(&self.verifying_key_pem) {
            return Ok(());
        }
        let payload = json!({
            "version": link.version,
            "data": link.data,
            "meta": link.meta,
        });
        let payload_bytes = serde_json::to_vec(&payload)?;
        let signature: Signature = self.signing_key.sign(&payload_bytes);
        link.signatures.push(common::model::Signature {
            public_key: self.verifying_key_pem.clone(),
            signature: signature.to_bytes().to_vec(),
            payload_path: vec!["version".into(), "data".into(), "meta".into()],
        });
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::model::LinkBuilder;
    use mockito::Server;
    use rsa::pkcs8::EncodePrivateKey as _;
    use rsa::RsaPrivateKey;

    fn test_signing_key() -> SigningKey {
        SigningKey::random(&mut rand_core::OsRng)
    }

    fn test_decryptor() -> Arc<Decryptor> {
        let key = RsaPrivateKey::new(&mut rand_core::OsRng, 2048).unwrap();
        Arc::new(Decryptor::from_pem(&key.to_pkcs8_pem(LineEnding::LF).unwrap()).unwrap())
    }

    async fn client_against(server: &Server) -> TraceClient {
        let base = url::Url::parse(&format!("{}/", server.url())).unwrap();
        let config = TraceClientConfig::new(base.clone(), base);
        TraceClient::new(config, test_signing_key(), test_decryptor()).unwrap()
    }

    fn jwt(exp: i64) -> String {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header = URL_SAFE_NO_PAD.encode(b"{}");
        let payload = URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{exp}}}"));
        format!("{header}.{payload}.sig")
    }

    #[tokio::test]
    async fn login_is_triggered_once_and_cached() {
        let mut server = Server::new_async().await;
        let now = Utc::now().timestamp();
        let login_mock = server
            .mock("GET", "/login")
            .with_status(200)
            .with_body(format!(r#"{{"token":"{}"}}"#, jwt(now + 300)))
            .expect(1)
            .create_async()
            .await;
        let gql_mock = server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(r#"{"data": {"ok": true}}"#)
            .expect(2)
            .create_async()
            .await;

        let client = client_against(&server).await;
        let _: Value = client.call_trace_gql("query{ok}", json!({})).await.unwrap();
        let _: Value = client.call_trace_gql("query{ok}", json!({})).await.unwrap();

        login_mock.assert_async().await;
        gql_mock.assert_async().await;
    }

    #[tokio::test]
    async fn graphql_errors_surface_as_graphql_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/login")
            .with_status(200)
            .with_body(format!(r#"{{"token":"{}"}}"#, jwt(Utc::now().timestamp() + 300)))
            .create_async()
            .await;
        server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(r#"{"data": null, "errors": [{"message": "boom"}]}"#)
            .create_async()
            .await;

        let client = client_against(&server).await;
        let err = client.call_trace_gql::<Value>("query{ok}", json!({})).await.unwrap_err();
        assert!(matches!(err, TraceClientError::GraphQl { .. }));
    }

    #[tokio::test]
    async fn create_link_signs_unsigned_link() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/login")
            .with_status(200)
            .with_body(format!(r#"{{"token":"{}"}}"#, jwt(Utc::now().timestamp() + 300)))
            .create_async()
            .await;
        server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(r#"{"data": {"createLink": {"trace": {"rowId": "1"}}}}"#)
            .create_async()
            .await;

        let client = client_against(&server).await;
        let link = LinkBuilder::new("wf", "map", "init").build();
        assert!(link.signatures.is_empty());
        let resp = client.create_link(link).await.unwrap();
        assert_eq!(resp.create_link.trace.row_id, "1");
    }

    #[test]
    fn sign_if_needed_is_idempotent_for_already_signed_links() {
        let key = test_signing_key();
        let pub_pem = VerifyingKey::from(&key).to_public_key_pem(LineEnding::LF).unwrap();
        let mut link = LinkBuilder::new("wf", "map", "init").build();
        link.signatures.push(common::model::Signature {
            public_key: pub_pem.clone(),
            signature: vec![9, 9, 9],
            payload_path: vec![],
        });
        let client = TraceClient {
            http: Client::new(),
            trace_base: url::Url::parse("http://x/").unwrap(),
            account_base: url::Url::parse("http://x/").unwrap(),
            signing_key: key,
            verifying_key_pem: pub_pem,
            decryptor: test_decryptor(),
            token: Mutex::new(None),
        };
        client.sign_if_needed(&mut link).unwrap();
        assert_eq!(link.signatures.len(), 1);
        assert_eq!(link.signatures[0].signature, vec![9, 9, 9]);
    }
}
