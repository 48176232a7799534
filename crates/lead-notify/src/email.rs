use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use lead_domain::{Channel, Lead};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::ChannelSender;

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: Vec<String>,
    pub use_tls: bool,
    pub timeout: Duration,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
            from: String::new(),
            to: Vec::new(),
            use_tls: true,
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct EmailSender {
    cfg: EmailConfig,
}

impl EmailSender {
    pub fn new(cfg: EmailConfig) -> Self {
        Self { cfg }
    }

    fn transport(&self) -> anyhow::Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if self.cfg.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.cfg.host)
        } else {
            Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.cfg.host))
        }
        .context("build smtp transport")?;

        let builder = builder.port(self.cfg.port).timeout(Some(self.cfg.timeout));

        let builder = if self.cfg.username.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(self.cfg.username.clone(), self.cfg.password.clone()))
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, lead: &Lead) -> anyhow::Result<()> {
        if self.cfg.host.trim().is_empty() {
            bail!("smtp host not configured");
        }
        if self.cfg.port == 0 {
            bail!("smtp port not configured");
        }
        if self.cfg.from.trim().is_empty() {
            bail!("smtp from not configured");
        }
        if self.cfg.to.is_empty() {
            bail!("smtp to not configured");
        }

        let subject = format!("New Partner Lead: {}", safe_one_line(&lead.contact_name));
        let body = build_email_body(lead);

        let mut builder = Message::builder()
            .from(self.cfg.from.parse().context("parse from address")?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);

        for to in &self.cfg.to {
            let to = to.trim();
            if to.is_empty() {
                continue;
            }
            builder = builder.to(to.parse().with_context(|| format!("parse to address {to}"))?);
        }

        let message = builder.body(body).context("build message body")?;

        let transport = self.transport()?;
        transport
            .send(message)
            .await
            .map_err(|e| anyhow!("smtp send: {e}"))?;

        Ok(())
    }
}

fn build_email_body(lead: &Lead) -> String {
    let lines = [
        "New lead received:".to_string(),
        String::new(),
        format!("ID: {}", lead.id),
        format!("CreatedAt: {}", lead.created_at.to_rfc3339()),
        format!("BusinessName: {}", safe_one_line(&lead.business_name)),
        format!("ContactName: {}", safe_one_line(&lead.contact_name)),
        format!("Phone: {}", safe_one_line(&lead.phone_whatsapp)),
        format!("City: {}", safe_one_line(&lead.city)),
        format!("SalonType: {}", lead.salon_type.as_str()),
        format!("Email: {}", safe_one_line(lead.email.as_deref().unwrap_or(""))),
        format!("Message: {}", safe_one_line(lead.message.as_deref().unwrap_or(""))),
        format!(
            "PageURLInitial: {}",
            safe_one_line(lead.page_url_initial.as_deref().unwrap_or(""))
        ),
        format!(
            "PageURLCurrent: {}",
            safe_one_line(lead.page_url_current.as_deref().unwrap_or(""))
        ),
        format!("UserAgent: {}", safe_one_line(lead.user_agent.as_deref().unwrap_or(""))),
        format!("IPAddress: {}", safe_one_line(lead.ip_address.as_deref().unwrap_or(""))),
    ];
    lines.join("\n") + "\n"
}

fn safe_one_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lead_domain::SalonType;
    use uuid::Uuid;

    fn sample_lead() -> Lead {
        Lead {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            idempotency_key_hash: None,
            business_name: "Biz".into(),
            contact_name: "A\nB".into(),
            phone_whatsapp: "+6281234567890".into(),
            city: "Jakarta".into(),
            salon_type: SalonType::Salon,
            consent: true,
            chair_count: None,
            specialization: None,
            current_brands_used: None,
            monthly_spend_range: None,
            email: Some("a@example.com".into()),
            message: None,
            page_url_initial: None,
            page_url_current: None,
            user_agent: None,
            ip_address: None,
        }
    }

    #[test]
    fn body_strips_newlines_from_free_text_fields() {
        let body = build_email_body(&sample_lead());
        assert!(body.contains("ContactName: A B"));
    }

    #[tokio::test]
    async fn missing_host_is_rejected_before_any_network_call() {
        let sender = EmailSender::new(EmailConfig::default());
        let err = sender.send(&sample_lead()).await.unwrap_err();
        assert!(err.to_string().contains("smtp host"));
    }
}
