use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use lead_config::AppConfig;
use lead_notify::{ChannelSender, EmailConfig, EmailSender, OutboxWorker, WebhookConfig, WebhookSender};
use lead_store::{LeadRepository, NotificationRepository};
use tokio::signal;
use tokio::sync::broadcast;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lead_common::logging::init_logging("lead-outbox-worker");

    let cfg = AppConfig::load_from_env()?;
    let (leads, notifications) = build_repositories(&cfg).await?;
    let senders = build_senders(&cfg);

    let worker = OutboxWorker::new(notifications.clone(), leads, senders)
        .with_poll_interval(Duration::from_secs(env_or_parse("OUTBOX_POLL_SECONDS", 3)))
        .with_batch_size(env_or_parse("OUTBOX_BATCH_SIZE", 20));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let worker_shutdown = shutdown_tx.subscribe();
    let worker_handle = tokio::spawn(async move {
        worker.run(worker_shutdown).await;
    });

    let sidecar_handle = tokio::spawn(run_sidecar(notifications, shutdown_tx.subscribe()));

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = worker_handle.await;
        let _ = sidecar_handle.await;
    })
    .await;

    Ok(())
}

async fn run_sidecar(notifications: Arc<dyn NotificationRepository>, mut shutdown: broadcast::Receiver<()>) {
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/metrics",
            get({
                let notifications = notifications.clone();
                move || render_metrics(notifications.clone())
            }),
        );

    let host = env_or("HEALTH_HOST", "0.0.0.0");
    let port = env_or_parse("HEALTH_PORT", 9090u16);
    let addr = format!("{host}:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, addr, "outbox worker sidecar failed to bind");
            return;
        }
    };
    tracing::info!(addr, "outbox worker sidecar listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
    });

    if let Err(err) = server.await {
        tracing::error!(error = %err, "outbox worker sidecar error");
    }
}

async fn render_metrics(notifications: Arc<dyn NotificationRepository>) -> String {
    let refresh = tokio::time::timeout(Duration::from_secs(2), notifications.stats());
    if let Ok(Ok(stats)) = refresh.await {
        lead_metrics::set_lead_notification_backlog(
            &stats.counts_by_status,
            stats.pending_ready_count,
            stats.pending_delayed_count,
            stats.oldest_ready_pending_created_at,
        );
    }
    lead_metrics::init_recorder().render()
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
            let pool = sqlx::postgres::PgPoolOptions::new().max_connections(5).connect(url).await?;
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

fn build_senders(cfg: &AppConfig) -> Vec<Arc<dyn ChannelSender>> {
    let mut senders: Vec<Arc<dyn ChannelSender>> = Vec::new();
    if let Some(email) = &cfg.email {
        senders.push(Arc::new(EmailSender::new(EmailConfig {
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
        senders.push(Arc::new(WebhookSender::new(WebhookConfig {
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
