use std::sync::Arc;

use async_trait::async_trait;
use jobservice_core::JobResult;
use jobservice_domain::{ForwardingPort, MessageHeaders, MessagePublisher, TaskMessage};
use tracing::debug;

/// 通过消息发布者把信封转发到目的队列，消息头原样透传
pub struct BrokerForwarder {
    publisher: Arc<dyn MessagePublisher>,
}

impl BrokerForwarder {
    pub fn new(publisher: Arc<dyn MessagePublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl ForwardingPort for BrokerForwarder {
    async fn forward(
        &self,
        destination: &str,
        message: &TaskMessage,
        headers: &MessageHeaders,
    ) -> JobResult<()> {
        let payload = message.to_vec()?;
        self.publisher.publish(destination, &payload, headers).await?;

        debug!("任务 {} 已转发到 {}", message.task_id, destination);
        Ok(())
    }
}
