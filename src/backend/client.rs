//! Order backend HTTP client.
//!
//! One client instance serves the whole process. The access token is
//! acquired lazily from the configured refresh token and guarded by an
//! async mutex so only one refresh is ever in flight; concurrent callers
//! block on the refresh and reuse the result.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::orders::{
    normalize_phone, BackendEnvelope, IdentificationContext, Order, OrderSummary,
};
use super::returns::{ItemCondition, ReturnKind, ReturnReason};

/// Per-request timeout against the backend.
const BACKEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Nominal token lifetime granted by the backend.
const TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Tokens are treated as expired this long before their nominal expiry.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60 * 60;

/// Default number of orders fetched for caller identification.
const IDENTIFICATION_LIMIT: u32 = 5;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Network failure or backend 5xx; the caller may retry or apologize.
    #[error("backend unavailable: {0}")]
    Transient(String),

    /// Token refresh failed; retriable once credentials recover.
    #[error("backend authentication failed: {0}")]
    Auth(String),

    /// The caller supplied no usable search condition.
    #[error("invalid query: {0}")]
    InvalidQuery(&'static str),

    /// The backend rejected the write.
    #[error("backend rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - chrono::Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Return-registration input, validated upstream by the tool dispatcher.
#[derive(Debug, Clone)]
pub struct ReturnRequest {
    pub order_id: String,
    pub reason: ReturnReason,
    pub condition: ItemCondition,
    pub kind: ReturnKind,
    pub description: Option<String>,
}

/// Receipt for a registered return.
#[derive(Debug, Clone)]
pub struct ReturnReceipt {
    pub return_id: String,
    pub message: String,
}

/// Process-wide client for the order-management backend.
pub struct OrderClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token: Mutex<Option<AccessToken>>,
}

impl OrderClient {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(BACKEND_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            token: Mutex::new(None),
        }
    }

    /// Identify a caller by dialed number. Never fails: backend trouble
    /// yields `found=false, error=true` and the call proceeds with a
    /// neutral greeting.
    pub async fn search_by_phone(&self, raw_number: &str) -> IdentificationContext {
        let phone = normalize_phone(raw_number);
        match self
            .search_orders(Some(&phone), None, IDENTIFICATION_LIMIT)
            .await
        {
            Ok(orders) if orders.is_empty() => {
                debug!(%phone, "caller not found in order backend");
                IdentificationContext::unknown()
            }
            Ok(orders) => {
                let name = orders[0].customer_name.clone();
                let summaries: Vec<OrderSummary> =
                    orders.iter().map(OrderSummary::from).collect();
                debug!(%phone, orders = summaries.len(), "caller identified");
                IdentificationContext::identified(name, summaries)
            }
            Err(e) => {
                warn!(%phone, error = %e, "caller identification failed");
                IdentificationContext::lookup_failed()
            }
        }
    }

    /// Search orders by phone substring and/or exact order id, newest
    /// first. At least one condition is required.
    pub async fn search_orders(
        &self,
        phone: Option<&str>,
        order_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Order>, BackendError> {
        if phone.is_none() && order_id.is_none() {
            return Err(BackendError::InvalidQuery(
                "either a phone number or an order id is required",
            ));
        }

        let mut form: Vec<(String, String)> = vec![("limit".to_string(), limit.to_string())];
        if let Some(phone) = phone {
            form.push(("customerPhone-like".to_string(), phone.to_string()));
        }
        if let Some(order_id) = order_id {
            form.push(("orderId-eq".to_string(), order_id.to_string()));
        }

        let envelope = self.post_form("/api/orders/search", &form).await?;
        if envelope.result != "success" {
            warn!(
                message = envelope.message.as_deref().unwrap_or("-"),
                "order search returned an error envelope"
            );
            return Ok(Vec::new());
        }

        Ok(envelope
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|record| record.into_order())
            .collect())
    }

    /// Fetch a single order by id.
    pub async fn get_order(&self, order_id: &str) -> Result<Option<Order>, BackendError> {
        let mut orders = self.search_orders(None, Some(order_id), 1).await?;
        Ok(if orders.is_empty() {
            None
        } else {
            Some(orders.remove(0))
        })
    }

    /// Register a return by appending to the order's note field. The
    /// return id is generated locally; the backend only sees the note.
    pub async fn register_return(
        &self,
        request: &ReturnRequest,
    ) -> Result<ReturnReceipt, BackendError> {
        let return_id = format!("RTN-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let mut note = format!(
            "[返品受付 {return_id}] 理由: {} / 状態: {} / ご希望: {}",
            request.reason.label(),
            request.condition.label(),
            request.kind.label(),
        );
        if let Some(description) = request.description.as_deref() {
            if !description.is_empty() {
                note.push_str(" / 詳細: ");
                note.push_str(description);
            }
        }

        let form = vec![
            ("orderId".to_string(), request.order_id.clone()),
            ("noteAppend".to_string(), note),
        ];
        let envelope = self.post_form("/api/orders/update", &form).await?;
        if envelope.result != "success" {
            return Err(BackendError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "update refused".to_string()),
            ));
        }

        Ok(ReturnReceipt {
            message: format!("返品受付番号は{return_id}です。"),
            return_id,
        })
    }

    /// POST a form to the backend with token auth. A 401 triggers one
    /// forced refresh and one retry; further failures surface as errors.
    async fn post_form(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<BackendEnvelope, BackendError> {
        let token = self.access_token(false).await?;
        match self.post_form_with_token(path, form, &token).await {
            Err(BackendError::Auth(_)) => {
                debug!("access token rejected, refreshing once");
                let token = self.access_token(true).await?;
                self.post_form_with_token(path, form, &token).await
            }
            other => other,
        }
    }

    async fn post_form_with_token(
        &self,
        path: &str,
        form: &[(String, String)],
        token: &str,
    ) -> Result<BackendEnvelope, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .form(form)
            .send()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(BackendError::Auth("access token rejected".to_string()));
        }
        if !status.is_success() {
            return Err(BackendError::Transient(format!("{url} returned {status}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        match serde_json::from_str::<BackendEnvelope>(&text) {
            Ok(envelope) => Ok(envelope),
            Err(e) => {
                // A schema drift must not take the call down; treat the
                // response as an empty result set.
                error!(%url, error = %e, "unparseable backend response");
                Ok(BackendEnvelope {
                    result: "success".to_string(),
                    message: None,
                    count: None,
                    data: Some(Vec::new()),
                })
            }
        }
    }

    /// Current access token, refreshing when absent, expired, or forced.
    /// The mutex is held across the refresh so concurrent callers wait
    /// instead of stampeding the token endpoint.
    async fn access_token(&self, force: bool) -> Result<String, BackendError> {
        let mut guard = self.token.lock().await;
        let now = Utc::now();
        if !force {
            if let Some(token) = guard.as_ref() {
                if !token.is_expired(now) {
                    return Ok(token.token.clone());
                }
            }
        }

        let url = format!("{}/api/token", self.base_url);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BackendError::Auth(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Auth(e.to_string()))?;
        let lifetime = token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS);
        let fresh = AccessToken {
            token: token.access_token,
            expires_at: now + chrono::Duration::seconds(lifetime),
        };
        debug!(expires_at = %fresh.expires_at, "backend access token refreshed");
        let value = fresh.token.clone();
        *guard = Some(fresh);
        Ok(value)
    }
}
