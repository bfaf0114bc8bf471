//! 全体广播：投递给所有已注册连接，不区分用户

use std::sync::Arc;

use async_trait::async_trait;
use domain::Notification;
use tracing::debug;

use crate::notifier::{fan_out, DeliveryReport};
use crate::session::SessionRegistry;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast_all(&self, notification: Notification) -> DeliveryReport;
}

pub struct SessionBroadcaster {
    registry: Arc<SessionRegistry>,
}

impl SessionBroadcaster {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Broadcaster for SessionBroadcaster {
    async fn broadcast_all(&self, notification: Notification) -> DeliveryReport {
        let handles = self.registry.all_connections().await;
        let report = fan_out(&handles, &notification);
        debug!(
            kind = ?notification.kind,
            delivered = report.delivered,
            failed = report.failed,
            "broadcast finished"
        );
        report
    }
}
