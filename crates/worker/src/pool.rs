use std::sync::Arc;

use futures::StreamExt;
use jobservice_core::config::{PublisherConfig, TrackingConfig};
use jobservice_core::JobResult;
use jobservice_dispatcher::TaskPublisher;
use jobservice_domain::{JobReporter, TaskMessage};
use jobservice_infrastructure::{
    headers_from_properties, BrokerForwarder, RabbitBroker, RabbitMessagePublisher,
};
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions};
use metrics::counter;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::proxy::{ProxyOutcome, TrackingProxy};

/// 跟踪Worker池
///
/// 每个Worker拥有独立的消费通道和发布通道，一次只处理一条消息，
/// 处理完成后才确认。Job Store连接按调用从连接池获取，不在Worker间共享。
pub struct TrackingWorkerPool {
    broker: Arc<RabbitBroker>,
    reporter: Arc<dyn JobReporter>,
    tracking: TrackingConfig,
    publisher: PublisherConfig,
}

impl TrackingWorkerPool {
    pub fn new(
        broker: Arc<RabbitBroker>,
        reporter: Arc<dyn JobReporter>,
        tracking: TrackingConfig,
        publisher: PublisherConfig,
    ) -> Self {
        Self {
            broker,
            reporter,
            tracking,
            publisher,
        }
    }

    /// 启动所有Worker并等待它们在收到停止信号后退出
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> JobResult<()> {
        if !self.reporter.verify_reachable().await {
            error!("Job Database connection check failed.");
        }

        let host = hostname::get()
            .unwrap_or_else(|_| "unknown".into())
            .to_string_lossy()
            .to_string();

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.tracking.threads);
        for index in 0..self.tracking.threads {
            let worker = self.create_worker(index, &host).await?;
            handles.push(tokio::spawn(worker.run(shutdown_rx.resubscribe())));
        }

        info!(
            "跟踪Worker池已启动，Worker数量: {}，监听队列: {}",
            handles.len(),
            self.broker.config().tracking_queue
        );

        for handle in handles {
            if let Err(e) = handle.await {
                error!("跟踪Worker异常退出: {}", e);
            }
        }

        info!("跟踪Worker池已停止");
        Ok(())
    }

    async fn create_worker(&self, index: usize, host: &str) -> JobResult<TrackingWorker> {
        let publisher = Arc::new(self.broker.create_publisher().await?);
        let task_publisher = TaskPublisher::new(publisher.clone(), &self.publisher)?;
        let forwarder = BrokerForwarder::new(publisher.clone());

        let proxy = TrackingProxy::new(
            self.reporter.clone(),
            Arc::new(forwarder),
            Arc::new(task_publisher),
            publisher.clone(),
            &self.tracking,
            self.broker.config().output_queue.clone(),
        );

        let consumer_tag = format!("{}-{}-{}", self.tracking.worker_name, host, index);
        let (channel, consumer) = self
            .broker
            .create_consumer(&self.broker.config().tracking_queue, &consumer_tag)
            .await?;

        Ok(TrackingWorker {
            consumer_tag,
            proxy,
            publisher,
            channel,
            consumer,
        })
    }
}

struct TrackingWorker {
    consumer_tag: String,
    proxy: TrackingProxy,
    publisher: Arc<RabbitMessagePublisher>,
    channel: lapin::Channel,
    consumer: lapin::Consumer,
}

impl TrackingWorker {
    async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("跟踪Worker {} 开始消费", self.consumer_tag);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("跟踪Worker {} 收到停止信号", self.consumer_tag);
                    break;
                }
                delivery = self.consumer.next() => match delivery {
                    Some(Ok(delivery)) => self.process(delivery).await,
                    Some(Err(e)) => {
                        error!("跟踪Worker {} 消费失败: {}", self.consumer_tag, e);
                        break;
                    }
                    None => {
                        warn!("跟踪Worker {} 的消费者已关闭", self.consumer_tag);
                        break;
                    }
                }
            }
        }

        self.publisher.close().await;
        if let Err(e) = self.channel.close(200, "正常关闭").await {
            debug!("关闭消费通道失败: {}", e);
        }
    }

    async fn process(&self, delivery: Delivery) {
        counter!("jobservice_tracking_messages_total").increment(1);
        let headers = headers_from_properties(&delivery.properties);

        let message = match TaskMessage::from_slice(&delivery.data) {
            Ok(message) => message,
            Err(e) => {
                warn!("无法解析跟踪队列中的消息，丢弃: {}", e);
                self.reject(&delivery).await;
                return;
            }
        };

        match self.proxy.handle(&message, &headers).await {
            Ok(ProxyOutcome::Undeliverable { .. }) => self.reject(&delivery).await,
            Ok(_) => {
                if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                    error!("确认消息失败: {}", e);
                }
            }
            Err(e) => {
                warn!("转发任务 {} 失败，消息重新入队: {}", message.task_id, e);
                let options = BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                };
                if let Err(e) = delivery.acker.nack(options).await {
                    error!("消息重新入队失败: {}", e);
                }
            }
        }
    }

    async fn reject(&self, delivery: &Delivery) {
        if let Err(e) = delivery
            .acker
            .reject(BasicRejectOptions { requeue: false })
            .await
        {
            error!("拒绝消息失败: {}", e);
        }
    }
}
