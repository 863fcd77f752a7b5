//! Transport to the Widely API.
//!
//! One POST per call, JSON in and out. The raw response is returned
//! unvalidated; deciding what counts as success is left to
//! [`super::validate`] so each call site can apply its own rule.

use std::time::Duration;

use async_trait::async_trait;

use super::auth::AuthSigner;
use super::error::WidelyError;
use super::types::{Payload, RemoteCall, RemoteResult};
use crate::config::Config;

/// Which configured URL a function is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidelyEndpoint {
    /// Account-scoped actions: provisioning, packages, device actions.
    Account,
    /// Subscriber reads.
    App,
}

/// Functions that go to the app-action URL; everything else is account-scoped.
const APP_FUNCTIONS: &[&str] = &["search_users", "get_mobiles", "get_mobile_info"];

impl WidelyEndpoint {
    pub fn for_function(func_name: &str) -> Self {
        if APP_FUNCTIONS.contains(&func_name) {
            Self::App
        } else {
            Self::Account
        }
    }
}

/// Named remote procedure call against Widely.
///
/// Implemented over HTTPS by [`WidelyClient`]; tests substitute recording fakes.
#[async_trait]
pub trait WidelyApi: Send + Sync {
    async fn call(&self, func_name: &str, data: Payload) -> Result<RemoteResult, WidelyError>;
}

/// HTTPS client for Widely.
pub struct WidelyClient {
    http: reqwest::Client,
    signer: AuthSigner,
    account_action_url: String,
    app_action_url: String,
}

impl WidelyClient {
    /// Build from validated config.
    ///
    /// Certificate validation is skipped only when `widely.insecure_tls`
    /// is set, which config validation refuses in production.
    pub fn from_config(config: &Config) -> Result<Self, WidelyError> {
        let relax_tls = tls_relaxed(config);
        if relax_tls {
            tracing::warn!(
                environment = config.environment.as_str(),
                "Widely TLS certificate validation disabled"
            );
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs()))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs()))
            .danger_accept_invalid_certs(relax_tls)
            .build()
            .map_err(|e| WidelyError::upstream(format!("failed to build Widely HTTP client: {e}")))?;

        Ok(Self {
            http,
            signer: AuthSigner::from_config(&config.widely),
            account_action_url: config.widely.account_action_url.clone(),
            app_action_url: config.widely.app_action_url.clone(),
        })
    }

    fn url_for(&self, endpoint: WidelyEndpoint) -> &str {
        match endpoint {
            WidelyEndpoint::Account => &self.account_action_url,
            WidelyEndpoint::App => &self.app_action_url,
        }
    }
}

/// Certificate checks are skipped only on explicit request outside production.
fn tls_relaxed(config: &Config) -> bool {
    config.widely.insecure_tls && !config.environment.is_production()
}

#[async_trait]
impl WidelyApi for WidelyClient {
    async fn call(&self, func_name: &str, data: Payload) -> Result<RemoteResult, WidelyError> {
        let envelope = RemoteCall {
            auth: self.signer.create_auth(),
            func_name: func_name.to_string(),
            data,
        };
        let url = self.url_for(WidelyEndpoint::for_function(func_name));

        tracing::debug!(func_name, "Calling Widely");

        let resp = self
            .http
            .post(url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(func_name, error = %e, "Widely transport failure");
                WidelyError::from_transport(&e, func_name)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            tracing::warn!(func_name, status = status.as_u16(), "Widely returned HTTP error");
            return Err(WidelyError::Upstream {
                status: status.as_u16(),
                message: format!("Widely {func_name} failed ({status}): {snippet}"),
            });
        }

        resp.json::<RemoteResult>().await.map_err(|e| {
            WidelyError::upstream(format!("Widely {func_name} returned malformed JSON: {e}"))
        })
    }
}
