//! Downstream router client
//!
//! Fires events at, and probes the existence of, trigger endpoints on the
//! router (`/api/v1/namespaces/{namespace}/triggers/{name}`). Requests are
//! signed with the trigger's own credential via basic auth.

use std::time::Duration;

use async_trait::async_trait;
use shared::TriggerRecord;

use crate::error::RouterError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Router call interface for testability
///
/// Both calls resolve to the response status code; only transport-level
/// failures surface as errors (classified transient by the fire engine).
#[async_trait]
pub trait RouterClient: Send + Sync {
    /// Deliver one event to a trigger's router endpoint
    async fn fire(
        &self,
        trigger: &TriggerRecord,
        event: &serde_json::Value,
    ) -> Result<u16, RouterError>;

    /// Lightweight existence probe against the same endpoint
    async fn probe(&self, trigger: &TriggerRecord) -> Result<u16, RouterError>;
}

/// Reqwest-based router client with a pooled connection
pub struct HttpRouterClient {
    client: reqwest::Client,
    base: String,
}

impl HttpRouterClient {
    pub fn new(router_host: &str) -> Result<Self, shared::Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent("feed-provider/1.0")
            .build()
            .map_err(|e| shared::Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base: format!("https://{}", router_host),
        })
    }

    fn trigger_url(&self, trigger: &TriggerRecord) -> String {
        let key = trigger.key();
        format!(
            "{}/api/v1/namespaces/{}/triggers/{}",
            self.base, key.namespace, key.name
        )
    }
}

/// Split a `uuid:key` credential into basic-auth parts
fn auth_parts(credential: &str) -> (&str, Option<&str>) {
    match credential.split_once(':') {
        Some((user, pass)) => (user, Some(pass)),
        None => (credential, None),
    }
}

#[async_trait]
impl RouterClient for HttpRouterClient {
    async fn fire(
        &self,
        trigger: &TriggerRecord,
        event: &serde_json::Value,
    ) -> Result<u16, RouterError> {
        let (user, pass) = auth_parts(&trigger.doc.credential);

        let response = self
            .client
            .post(self.trigger_url(trigger))
            .basic_auth(user, pass)
            .json(event)
            .send()
            .await
            .map_err(|e| RouterError::Network(e.to_string()))?;

        Ok(response.status().as_u16())
    }

    async fn probe(&self, trigger: &TriggerRecord) -> Result<u16, RouterError> {
        let (user, pass) = auth_parts(&trigger.doc.credential);

        let response = self
            .client
            .get(self.trigger_url(trigger))
            .basic_auth(user, pass)
            .send()
            .await
            .map_err(|e| RouterError::Network(e.to_string()))?;

        Ok(response.status().as_u16())
    }
}
