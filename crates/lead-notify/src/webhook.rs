use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use lead_domain::{Channel, Lead};
use serde_json::json;

use crate::ChannelSender;

#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    pub url: String,
    pub secret: String,
    pub timeout: Duration,
}

pub struct WebhookSender {
    cfg: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(cfg: WebhookConfig) -> Self {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            cfg.timeout
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("build reqwest client");
        Self { cfg, client }
    }
}

#[async_trait]
impl ChannelSender for WebhookSender {
    fn channel(&self) -> Channel {
        Channel::Webhook
    }

    async fn send(&self, lead: &Lead) -> anyhow::Result<()> {
        let url = self.cfg.url.trim();
        if url.is_empty() {
            bail!("webhook url not configured");
        }

        let payload = json!({
            "lead_id": lead.id.to_string(),
            "created_at": lead.created_at.to_rfc3339(),
            "business_name": lead.business_name,
            "contact_name": lead.contact_name,
            "phone": lead.phone_whatsapp,
            "city": lead.city,
            "salon_type": lead.salon_type.as_str(),
            "email": lead.email,
            "message": lead.message,
            "page_url_initial": lead.page_url_initial,
            "page_url_current": lead.page_url_current,
            "user_agent": lead.user_agent,
            "ip_address": lead.ip_address,
        });

        let mut req = self
            .client
            .post(url)
            .header("Content-Type", "application/json; charset=utf-8")
            .json(&payload);

        let secret = self.cfg.secret.trim();
        if !secret.is_empty() {
            req = req.header("X-Webhook-Secret", secret);
        }

        let resp = req.send().await.context("webhook request")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("webhook non-2xx: {status}"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lead_domain::SalonType;
    use uuid::Uuid;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_lead() -> Lead {
        Lead {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            idempotency_key_hash: None,
            business_name: "Biz".into(),
            contact_name: "A".into(),
            phone_whatsapp: "+6281234567890".into(),
            city: "Jakarta".into(),
            salon_type: SalonType::Salon,
            consent: true,
            chair_count: None,
            specialization: None,
            current_brands_used: None,
            monthly_spend_range: None,
            email: None,
            message: None,
            page_url_initial: None,
            page_url_current: None,
            user_agent: None,
            ip_address: None,
        }
    }

    #[tokio::test]
    async fn posts_secret_header_and_succeeds_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("X-Webhook-Secret", "shh"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sender = WebhookSender::new(WebhookConfig {
            url: format!("{}/hook", server.uri()),
            secret: "shh".into(),
            timeout: Duration::from_secs(5),
        });

        sender.send(&sample_lead()).await.unwrap();
    }

    #[tokio::test]
    async fn non_2xx_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sender = WebhookSender::new(WebhookConfig {
            url: format!("{}/hook", server.uri()),
            secret: String::new(),
            timeout: Duration::from_secs(5),
        });

        let err = sender.send(&sample_lead()).await.unwrap_err();
        assert!(err.to_string().contains("non-2xx"));
    }

    #[tokio::test]
    async fn missing_url_is_rejected_before_any_network_call() {
        let sender = WebhookSender::new(WebhookConfig::default());
        let err = sender.send(&sample_lead()).await.unwrap_err();
        assert!(err.to_string().contains("webhook url"));
    }
}
