use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use servicehub::marketplace::{DeliveryChannel, DeliveryError, Notification};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Delivery channel for deployments without a push gateway: every hand-off is logged.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LoggingDeliveryChannel;

#[async_trait]
impl DeliveryChannel for LoggingDeliveryChannel {
    async fn deliver(
        &self,
        recipient_id: &str,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        info!(
            recipient_id,
            notification_id = %notification.id,
            kind = %notification.kind,
            priority = notification.priority.label(),
            "notification delivered"
        );
        Ok(())
    }
}
