//! Email templates and the outbound email adapter.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email gateway unavailable: {0}")]
    Gateway(String),
}

/// Template parameters collected from the caller's latest order.
#[derive(Debug, Clone, Default)]
pub struct EmailParams {
    pub customer_name: String,
    pub order_id: String,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub shop_name: String,
}

impl EmailParams {
    /// Carrier tracking page for the known carriers, when a tracking
    /// number exists.
    pub fn tracking_url(&self) -> Option<String> {
        let tracking = self.tracking_number.as_deref()?;
        let number: String = tracking.chars().filter(|c| c.is_ascii_digit()).collect();
        match self.carrier.as_deref()? {
            "ヤマト運輸" => Some(format!(
                "https://toi.kuronekoyamato.co.jp/cgi-bin/tneko?number={number}"
            )),
            "佐川急便" => Some(format!(
                "https://k2k.sagawa-exp.co.jp/p/web/okurijosearch.do?okurijoNo={number}"
            )),
            "日本郵便" => Some(format!(
                "https://trackings.post.japanpost.jp/services/srv/search/?requestNo1={number}"
            )),
            _ => None,
        }
    }
}

/// Email kinds the assistant can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    Tracking,
    ReturnForm,
    Callback,
}

impl EmailTemplate {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "tracking" => Some(Self::Tracking),
            "return_form" => Some(Self::ReturnForm),
            "callback" => Some(Self::Callback),
            _ => None,
        }
    }

    /// Render subject and body.
    pub fn render(self, p: &EmailParams) -> (String, String) {
        match self {
            Self::Tracking => {
                let mut body = format!(
                    "{}様\n\nいつも{}をご利用いただきありがとうございます。\nご注文({})の配送状況をご案内いたします。\n",
                    p.customer_name, p.shop_name, p.order_id
                );
                if let Some(carrier) = p.carrier.as_deref() {
                    body.push_str(&format!("\n配送業者: {carrier}"));
                }
                if let Some(tracking) = p.tracking_number.as_deref() {
                    body.push_str(&format!("\nお問い合わせ番号: {tracking}"));
                }
                if let Some(url) = p.tracking_url() {
                    body.push_str(&format!("\n配送状況の確認: {url}"));
                }
                body.push_str(&format!("\n\n{}\n", p.shop_name));
                (
                    format!("【{}】ご注文の配送状況について", p.shop_name),
                    body,
                )
            }
            Self::ReturnForm => (
                format!("【{}】返品手続きのご案内", p.shop_name),
                format!(
                    "{}様\n\nご注文({})の返品手続きのご案内をお送りいたします。\n同封の返品用紙にご記入のうえ、商品とあわせてご返送ください。\n\n{}\n",
                    p.customer_name, p.order_id, p.shop_name
                ),
            ),
            Self::Callback => (
                format!("【{}】お問い合わせありがとうございます", p.shop_name),
                format!(
                    "{}様\n\nお電話いただきありがとうございました。\n担当者より折り返しご連絡いたしますので、今しばらくお待ちください。\n\n{}\n",
                    p.customer_name, p.shop_name
                ),
            ),
        }
    }
}

#[async_trait]
pub trait EmailAdapter: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), EmailError>;
}

/// Development adapter: logs instead of sending.
pub struct NoopEmailer;

#[async_trait]
impl EmailAdapter for NoopEmailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), EmailError> {
        info!(%to, %subject, "email adapter disabled, not sending");
        Ok(())
    }
}

/// HTTP email gateway adapter.
pub struct HttpEmailer {
    http: reqwest::Client,
    url: String,
    api_key: String,
    from: String,
}

impl HttpEmailer {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        Self {
            http,
            url: url.into(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }
}

#[async_trait]
impl EmailAdapter for HttpEmailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), EmailError> {
        let payload = json!({
            "from": self.from,
            "to": to,
            "subject": subject,
            "text": body,
        });
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EmailError::Gateway(e.to_string()))?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "email gateway refused the message");
            return Err(EmailError::Gateway(format!(
                "gateway returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> EmailParams {
        EmailParams {
            customer_name: "山田太郎".to_string(),
            order_id: "R-42".to_string(),
            carrier: Some("ヤマト運輸".to_string()),
            tracking_number: Some("1234-5678-9012".to_string()),
            shop_name: "サンプルストア".to_string(),
        }
    }

    #[test]
    fn template_names_resolve() {
        assert_eq!(EmailTemplate::from_name("tracking"), Some(EmailTemplate::Tracking));
        assert_eq!(
            EmailTemplate::from_name("return_form"),
            Some(EmailTemplate::ReturnForm)
        );
        assert_eq!(EmailTemplate::from_name("callback"), Some(EmailTemplate::Callback));
        assert_eq!(EmailTemplate::from_name("unknown"), None);
    }

    #[test]
    fn tracking_email_includes_carrier_and_number() {
        let (subject, body) = EmailTemplate::Tracking.render(&params());
        assert!(subject.contains("配送状況"));
        assert!(body.contains("ヤマト運輸"));
        assert!(body.contains("1234-5678-9012"));
        assert!(body.contains("kuronekoyamato"));
    }

    #[test]
    fn tracking_url_strips_non_digits() {
        let url = params().tracking_url().unwrap();
        assert!(url.ends_with("number=123456789012"));
    }

    #[test]
    fn unknown_carrier_has_no_tracking_url() {
        let mut p = params();
        p.carrier = Some("自社配送".to_string());
        assert!(p.tracking_url().is_none());
    }
}
