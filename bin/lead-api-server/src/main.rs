use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use lead_api_server::state::{AppState, AppStateConfig};
use lead_config::AppConfig;
use lead_notify::{ChannelSender, EmailConfig as NotifyEmailConfig, EmailSender, OutboxWorker, WebhookConfig as NotifyWebhookConfig, WebhookSender};
use lead_store::{LeadRepository, NotificationRepository};
use tokio::signal;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lead_common::logging::init_logging("lead-api-server");

    let cfg = AppConfig::load_from_env()?;
    let (leads, notifications): (Arc<dyn LeadRepository>, Arc<dyn NotificationRepository>) =
        build_repositories(&cfg).await?;

    let senders = build_senders(&cfg);

    let state = AppState::new(
        leads.clone(),
        notifications.clone(),
        AppStateConfig {
            admin_token: cfg.admin_token.clone(),
            env: cfg.env.clone(),
            http_host: cfg.http_host.clone(),
            http_port: cfg.http_port,
            notify_email_enabled: cfg.notify_email_enabled,
            notify_webhook_enabled: cfg.notify_webhook_enabled,
            trusted_proxies: parse_trusted_proxies(&cfg.trusted_proxies),
            lead_rate_limit_rps: cfg.rate_limit_rps,
        },
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let worker = OutboxWorker::new(notifications, leads, senders);
    let worker_shutdown = shutdown_tx.subscribe();
    let worker_handle = tokio::spawn(async move {
        worker.run(worker_shutdown).await;
    });

    let app = lead_api_server::build_router(state).layer(DefaultBodyLimit::max(cfg.max_body_bytes));

    let listener = tokio::net::TcpListener::bind(cfg.http_addr()).await?;
    tracing::info!(addr = %cfg.http_addr(), "lead-api-server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(30), worker_handle).await;

    Ok(())
}

async fn build_repositories(
    cfg: &AppConfig,
) -> anyhow::Result<(Arc<dyn LeadRepository>, Arc<dyn NotificationRepository>)> {
    match &cfg.database_url {
        None => Ok((
            Arc::new(lead_store::memory::InMemoryLeadRepository::new()),
            Arc::new(lead_store::memory::InMemoryNotificationRepository::new()),
        )),
        Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {
            let pool = sqlx::postgres::PgPoolOptions::new().max_connections(10).connect(url).await?;
            lead_store::postgres::init_schema(&pool).await?;
            Ok((
                Arc::new(lead_store::postgres::PostgresLeadRepository::new(pool.clone())),
                Arc::new(lead_store::postgres::PostgresNotificationRepository::new(pool)),
            ))
        }
        Some(url) => {
            let pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect(url).await?;
            lead_store::sqlite::init_schema(&pool).await?;
            Ok((
                Arc::new(lead_store::sqlite::SqliteLeadRepository::new(pool.clone())),
                Arc::new(lead_store::sqlite::SqliteNotificationRepository::new(pool)),
            ))
        }
    }
}

fn parse_trusted_proxies(raw: &[String]) -> Vec<std::net::IpAddr> {
    raw.iter()
        .filter_map(|entry| match entry.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!(entry, "ignoring unparseable TRUSTED_PROXIES entry");
                None
            }
        })
        .collect()
}

fn build_senders(cfg: &AppConfig) -> Vec<Arc<dyn ChannelSender>> {
    let mut senders: Vec<Arc<dyn ChannelSender>> = Vec::new();
    if let Some(email) = &cfg.email {
        senders.push(Arc::new(EmailSender::new(NotifyEmailConfig {
            host: email.host.clone(),
            port: email.port,
            username: email.username.clone(),
            password: email.password.clone(),
            from: email.from.clone(),
            to: email.to.clone(),
            use_tls: email.use_tls,
            timeout: cfg.smtp_timeout(),
        })));
    }
    if let Some(webhook) = &cfg.webhook {
        senders.push(Arc::new(WebhookSender::new(NotifyWebhookConfig {
            url: webhook.url.clone(),
            secret: webhook.secret.clone(),
            timeout: Duration::from_secs(10),
        })));
    }
    senders
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
