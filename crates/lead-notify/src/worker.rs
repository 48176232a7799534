use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lead_domain::backoff::{decide_retry, truncate_error, RetryDecision};
use lead_domain::{Channel, Notification};
use lead_store::{LeadRepository, NotificationRepository};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::ChannelSender;

pub struct OutboxWorker {
    notifications: Arc<dyn NotificationRepository>,
    leads: Arc<dyn LeadRepository>,
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
    poll_every: Duration,
    batch_size: i64,
}

impl OutboxWorker {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        leads: Arc<dyn LeadRepository>,
        senders: Vec<Arc<dyn ChannelSender>>,
    ) -> Self {
        let senders = senders.into_iter().map(|s| (s.channel(), s)).collect();
        Self {
            notifications,
            leads,
            senders,
            poll_every: Duration::from_secs(3),
            batch_size: 20,
        }
    }

    pub fn with_poll_interval(mut self, poll_every: Duration) -> Self {
        self.poll_every = poll_every;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Runs until `shutdown` fires. Ticks are never skipped for a slow
    /// previous tick (this is a simple interval, not a tokio Interval with
    /// burst catch-up), matching the teacher's `sleep`-between-batches loop.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.poll_every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    debug!("outbox worker received shutdown signal");
                    return;
                }
            }
        }
    }

    async fn tick(&self) {
        let items = match self.notifications.claim_batch(self.batch_size).await {
            Ok(items) => items,
            Err(err) => {
                error!(error = %err, batch_size = self.batch_size, "claim_batch failed");
                return;
            }
        };
        if items.is_empty() {
            return;
        }

        for notification in items {
            self.process_one(notification).await;
        }
    }

    async fn process_one(&self, notification: Notification) {
        let Some(sender) = self.senders.get(&notification.channel) else {
            let msg = format!("no sender configured for channel={}", notification.channel.as_str());
            warn!(
                notification_id = %notification.id,
                channel = notification.channel.as_str(),
                lead_id = %notification.lead_id,
                "notify_sender_missing"
            );
            if let Err(err) = self
                .notifications
                .mark_failed(notification.id, notification.attempts + 1, &msg)
                .await
            {
                error!(notification_id = %notification.id, error = %err, "notify_mark_failed_error");
            }
            lead_metrics::observe_lead_notification_send(
                notification.channel.as_str(),
                "no_sender",
                Duration::ZERO,
                None,
            );
            return;
        };

        let lead = match self.leads.get_by_id(notification.lead_id).await {
            Ok(lead) => lead,
            Err(err) => {
                warn!(
                    notification_id = %notification.id,
                    channel = notification.channel.as_str(),
                    lead_id = %notification.lead_id,
                    error = %err,
                    "notify_load_lead_failed"
                );
                self.retry_or_fail(&notification, anyhow::anyhow!("load lead: {err}")).await;
                lead_metrics::observe_lead_notification_send(
                    notification.channel.as_str(),
                    "error",
                    Duration::ZERO,
                    None,
                );
                return;
            }
        };

        let started = Instant::now();
        match sender.send(&lead).await {
            Ok(()) => {
                lead_metrics::observe_lead_notification_send(
                    notification.channel.as_str(),
                    "ok",
                    started.elapsed(),
                    None,
                );
                if let Err(err) = self.notifications.mark_sent(notification.id).await {
                    error!(notification_id = %notification.id, error = %err, "notify_mark_sent_error");
                }
            }
            Err(err) => {
                warn!(
                    notification_id = %notification.id,
                    channel = notification.channel.as_str(),
                    lead_id = %notification.lead_id,
                    attempt = notification.attempts + 1,
                    error = %truncate_error(&err.to_string()),
                    "notify_send_failed"
                );
                lead_metrics::observe_lead_notification_send(
                    notification.channel.as_str(),
                    "error",
                    started.elapsed(),
                    None,
                );
                self.retry_or_fail(&notification, err).await;
            }
        }
    }

    async fn retry_or_fail(&self, notification: &Notification, send_err: anyhow::Error) {
        let msg = truncate_error(&send_err.to_string());
        match decide_retry(notification.attempts) {
            RetryDecision::GiveUp { attempts } => {
                if let Err(err) = self.notifications.mark_failed(notification.id, attempts, &msg).await {
                    error!(notification_id = %notification.id, error = %err, "notify_mark_failed_error");
                }
            }
            RetryDecision::Retry { attempts, backoff } => {
                let next_attempt_at = chrono::Utc::now() + backoff;
                if let Err(err) = self
                    .notifications
                    .mark_retry(notification.id, attempts, next_attempt_at, &msg)
                    .await
                {
                    error!(notification_id = %notification.id, error = %err, "notify_mark_retry_error");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lead_domain::{LeadInput, SalonType};
    use lead_store::memory::{InMemoryLeadRepository, InMemoryNotificationRepository};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSender {
        channel: Channel,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl ChannelSender for CountingSender {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(&self, _lead: &lead_domain::Lead) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    fn sample_input() -> LeadInput {
        LeadInput {
            business_name: "Biz".into(),
            contact_name: "A".into(),
            phone_whatsapp: "+6281234567890".into(),
            city: "Jakarta".into(),
            salon_type_raw: "SALON".into(),
            consent: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn successful_send_marks_sent() {
        let leads = Arc::new(InMemoryLeadRepository::default());
        let notifications = Arc::new(InMemoryNotificationRepository::default());
        let lead = leads.create(sample_input(), SalonType::Salon).await.unwrap();
        notifications.enqueue(lead.id, Channel::Email).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let sender = Arc::new(CountingSender {
            channel: Channel::Email,
            calls: calls.clone(),
            fail: false,
        });

        let worker = OutboxWorker::new(notifications.clone(), leads.clone(), vec![sender]);
        worker.tick().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let rows = notifications
            .list(lead_domain::NotificationListQuery {
                lead_id: Some(lead.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows[0].status, lead_domain::Status::Sent);
    }

    #[tokio::test]
    async fn failed_send_schedules_a_retry() {
        let leads = Arc::new(InMemoryLeadRepository::default());
        let notifications = Arc::new(InMemoryNotificationRepository::default());
        let lead = leads.create(sample_input(), SalonType::Salon).await.unwrap();
        notifications.enqueue(lead.id, Channel::Webhook).await.unwrap();

        let sender = Arc::new(CountingSender {
            channel: Channel::Webhook,
            calls: Arc::new(AtomicUsize::new(0)),
            fail: true,
        });

        let worker = OutboxWorker::new(notifications.clone(), leads.clone(), vec![sender]);
        worker.tick().await;

        let rows = notifications
            .list(lead_domain::NotificationListQuery {
                lead_id: Some(lead.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows[0].status, lead_domain::Status::Pending);
        assert_eq!(rows[0].attempts, 1);
        assert!(rows[0].next_attempt_at > chrono::Utc::now());
    }

    #[tokio::test]
    async fn missing_sender_fails_immediately() {
        let leads = Arc::new(InMemoryLeadRepository::default());
        let notifications = Arc::new(InMemoryNotificationRepository::default());
        let lead = leads.create(sample_input(), SalonType::Salon).await.unwrap();
        notifications.enqueue(lead.id, Channel::Email).await.unwrap();

        let worker = OutboxWorker::new(notifications.clone(), leads.clone(), vec![]);
        worker.tick().await;

        let rows = notifications
            .list(lead_domain::NotificationListQuery {
                lead_id: Some(lead.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows[0].status, lead_domain::Status::Failed);
    }
}
