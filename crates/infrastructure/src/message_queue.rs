use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use jobservice_core::{config::MessageQueueConfig, JobError, JobResult};
use jobservice_domain::{HeaderValue, MessageHeaders, MessagePublisher};
use lapin::{
    options::*,
    publisher_confirm::Confirmation,
    types::{AMQPValue, ByteArray, DecimalValue, FieldArray, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// RabbitMQ连接
///
/// 连接在进程内共享，每个使用方通过 [`RabbitBroker::create_publisher`] 或
/// [`RabbitBroker::create_consumer`] 获得自己独占的通道。
pub struct RabbitBroker {
    connection: Connection,
    config: MessageQueueConfig,
}

impl RabbitBroker {
    /// 连接RabbitMQ并声明跟踪队列和输出队列
    pub async fn connect(config: MessageQueueConfig) -> JobResult<Self> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .map_err(|e| JobError::message_queue(format!("连接RabbitMQ失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", config.url);

        let broker = Self { connection, config };
        broker.initialize_queues().await?;
        Ok(broker)
    }

    async fn initialize_queues(&self) -> JobResult<()> {
        let channel = self.create_channel().await?;
        declare_queue(&channel, &self.config.tracking_queue).await?;
        declare_queue(&channel, &self.config.output_queue).await?;
        close_channel(&channel).await;

        info!("跟踪队列和输出队列初始化完成");
        Ok(())
    }

    async fn create_channel(&self) -> JobResult<Channel> {
        self.connection
            .create_channel()
            .await
            .map_err(|e| JobError::message_queue(format!("创建通道失败: {e}")))
    }

    /// 创建开启发布确认的独占发布通道
    pub async fn create_publisher(&self) -> JobResult<RabbitMessagePublisher> {
        let channel = self.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| JobError::message_queue(format!("开启发布确认失败: {e}")))?;

        Ok(RabbitMessagePublisher {
            channel,
            confirm_timeout: Duration::from_secs(self.config.confirm_timeout_seconds),
            declared: Mutex::new(HashSet::new()),
        })
    }

    /// 创建独占通道上的消费者，返回通道以便关闭
    pub async fn create_consumer(&self, queue: &str, consumer_tag: &str) -> JobResult<(Channel, Consumer)> {
        let channel = self.create_channel().await?;
        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| JobError::message_queue(format!("设置预取数量失败: {e}")))?;

        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| JobError::message_queue(format!("创建消费者失败: {e}")))?;

        debug!("为队列 {} 创建消费者: {}", queue, consumer_tag);
        Ok((channel, consumer))
    }

    pub fn config(&self) -> &MessageQueueConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub async fn close(&self) -> JobResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| JobError::message_queue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

async fn declare_queue(channel: &Channel, queue_name: &str) -> JobResult<()> {
    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable: true,
                exclusive: false,
                auto_delete: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| JobError::message_queue(format!("声明队列 {queue_name} 失败: {e}")))?;

    debug!("队列 {} 声明成功", queue_name);
    Ok(())
}

pub(crate) async fn close_channel(channel: &Channel) {
    if let Err(e) = channel.close(200, "正常关闭").await {
        debug!("关闭通道失败: {}", e);
    }
}

/// 带发布确认的RabbitMQ发布者
pub struct RabbitMessagePublisher {
    channel: Channel,
    confirm_timeout: Duration,
    declared: Mutex<HashSet<String>>,
}

impl RabbitMessagePublisher {
    async fn ensure_queue(&self, queue: &str) -> JobResult<()> {
        let mut declared = self.declared.lock().await;
        if !declared.contains(queue) {
            declare_queue(&self.channel, queue).await?;
            declared.insert(queue.to_string());
        }
        Ok(())
    }

    pub async fn close(&self) {
        close_channel(&self.channel).await;
    }
}

#[async_trait]
impl MessagePublisher for RabbitMessagePublisher {
    async fn publish(&self, queue: &str, payload: &[u8], headers: &MessageHeaders) -> JobResult<()> {
        self.ensure_queue(queue).await?;

        let properties = BasicProperties::default()
            .with_delivery_mode(2) // 2 = persistent
            .with_content_type("application/json".into())
            .with_headers(to_field_table(headers));

        let confirm = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| JobError::message_queue(format!("发布消息到队列 {queue} 失败: {e}")))?;

        match tokio::time::timeout(self.confirm_timeout, confirm).await {
            Ok(Ok(Confirmation::Nack(_))) => Err(JobError::message_queue(format!(
                "broker拒绝了发布到队列 {queue} 的消息"
            ))),
            Ok(Ok(_)) => {
                debug!("消息已发布到队列: {}", queue);
                Ok(())
            }
            Ok(Err(e)) => Err(JobError::message_queue(format!("消息发布确认失败: {e}"))),
            Err(_) => Err(JobError::message_queue(format!(
                "等待队列 {queue} 的发布确认超时 ({}秒)",
                self.confirm_timeout.as_secs()
            ))),
        }
    }
}

/// 将消息头转换为AMQP字段表
pub fn to_field_table(headers: &MessageHeaders) -> FieldTable {
    let mut table = FieldTable::default();
    for (name, value) in headers.iter() {
        table.insert(name.clone().into(), to_amqp_value(value));
    }
    table
}

fn to_amqp_value(value: &HeaderValue) -> AMQPValue {
    match value {
        HeaderValue::Bool(v) => AMQPValue::Boolean(*v),
        HeaderValue::ShortShortInt(v) => AMQPValue::ShortShortInt(*v),
        HeaderValue::ShortShortUInt(v) => AMQPValue::ShortShortUInt(*v),
        HeaderValue::ShortInt(v) => AMQPValue::ShortInt(*v),
        HeaderValue::ShortUInt(v) => AMQPValue::ShortUInt(*v),
        HeaderValue::LongInt(v) => AMQPValue::LongInt(*v),
        HeaderValue::LongUInt(v) => AMQPValue::LongUInt(*v),
        HeaderValue::Int(v) => AMQPValue::LongLongInt(*v),
        HeaderValue::Float(v) => AMQPValue::Float(*v),
        HeaderValue::Double(v) => AMQPValue::Double(*v),
        HeaderValue::Decimal { scale, value } => AMQPValue::DecimalValue(DecimalValue {
            scale: *scale,
            value: *value,
        }),
        HeaderValue::ShortText(v) => AMQPValue::ShortString(v.clone().into()),
        HeaderValue::Text(v) => AMQPValue::LongString(v.clone().into()),
        HeaderValue::RawText(v) => AMQPValue::LongString(v.clone().into()),
        HeaderValue::Array(values) => AMQPValue::FieldArray(FieldArray::from(
            values.iter().map(to_amqp_value).collect::<Vec<_>>(),
        )),
        HeaderValue::Timestamp(v) => AMQPValue::Timestamp(*v),
        HeaderValue::Table(nested) => AMQPValue::FieldTable(to_field_table(nested)),
        HeaderValue::Bytes(v) => AMQPValue::ByteArray(ByteArray::from(v.clone())),
        HeaderValue::Void => AMQPValue::Void,
    }
}

/// 从投递属性中读取消息头
pub fn headers_from_properties(properties: &BasicProperties) -> MessageHeaders {
    match properties.headers() {
        Some(table) => from_field_table(table),
        None => MessageHeaders::new(),
    }
}

fn from_field_table(table: &FieldTable) -> MessageHeaders {
    table
        .inner()
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), from_amqp_value(value)))
        .collect()
}

fn from_amqp_value(value: &AMQPValue) -> HeaderValue {
    match value {
        AMQPValue::Boolean(v) => HeaderValue::Bool(*v),
        AMQPValue::ShortShortInt(v) => HeaderValue::ShortShortInt(*v),
        AMQPValue::ShortShortUInt(v) => HeaderValue::ShortShortUInt(*v),
        AMQPValue::ShortInt(v) => HeaderValue::ShortInt(*v),
        AMQPValue::ShortUInt(v) => HeaderValue::ShortUInt(*v),
        AMQPValue::LongInt(v) => HeaderValue::LongInt(*v),
        AMQPValue::LongUInt(v) => HeaderValue::LongUInt(*v),
        AMQPValue::LongLongInt(v) => HeaderValue::Int(*v),
        AMQPValue::Float(v) => HeaderValue::Float(*v),
        AMQPValue::Double(v) => HeaderValue::Double(*v),
        AMQPValue::DecimalValue(v) => HeaderValue::Decimal {
            scale: v.scale,
            value: v.value,
        },
        AMQPValue::ShortString(v) => HeaderValue::ShortText(v.as_str().to_string()),
        AMQPValue::LongString(v) => match std::str::from_utf8(v.as_bytes()) {
            Ok(text) => HeaderValue::Text(text.to_string()),
            Err(_) => HeaderValue::RawText(v.as_bytes().to_vec()),
        },
        AMQPValue::FieldArray(values) => {
            HeaderValue::Array(values.as_slice().iter().map(from_amqp_value).collect())
        }
        AMQPValue::Timestamp(v) => HeaderValue::Timestamp(*v),
        AMQPValue::FieldTable(nested) => HeaderValue::Table(from_field_table(nested)),
        AMQPValue::ByteArray(v) => HeaderValue::Bytes(v.as_slice().to_vec()),
        AMQPValue::Void => HeaderValue::Void,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobservice_domain::{REJECTED_HEADER, RETRY_HEADER};

    #[test]
    fn test_headers_survive_field_table_conversion() {
        let headers = MessageHeaders::new()
            .with(REJECTED_HEADER, HeaderValue::Text("TASK_TOO_LARGE".into()))
            .with(RETRY_HEADER, HeaderValue::Int(2))
            .with("x-flag", HeaderValue::Bool(true));

        let properties = BasicProperties::default().with_headers(to_field_table(&headers));
        let restored = headers_from_properties(&properties);

        assert_eq!(restored, headers);
        assert_eq!(restored.routing_metadata().retry_count, 2);
    }

    #[test]
    fn test_every_field_kind_is_forwarded_unchanged() {
        let mut death = FieldTable::default();
        death.insert("queue".into(), AMQPValue::LongString("ocr-in".into()));
        death.insert("count".into(), AMQPValue::LongLongInt(1));
        death.insert("time".into(), AMQPValue::Timestamp(1_700_000_000));

        let mut table = FieldTable::default();
        table.insert(RETRY_HEADER.into(), AMQPValue::LongInt(2));
        table.insert(
            "x-death".into(),
            AMQPValue::FieldArray(FieldArray::from(vec![AMQPValue::FieldTable(death)])),
        );
        table.insert("x-score".into(), AMQPValue::Double(0.75));
        table.insert("x-ratio".into(), AMQPValue::Float(1.5));
        table.insert("x-flag".into(), AMQPValue::Boolean(false));
        table.insert("x-i8".into(), AMQPValue::ShortShortInt(-3));
        table.insert("x-u8".into(), AMQPValue::ShortShortUInt(3));
        table.insert("x-i16".into(), AMQPValue::ShortInt(-300));
        table.insert("x-u16".into(), AMQPValue::ShortUInt(300));
        table.insert("x-u32".into(), AMQPValue::LongUInt(70_000));
        table.insert("x-i64".into(), AMQPValue::LongLongInt(-9_000_000_000));
        table.insert(
            "x-decimal".into(),
            AMQPValue::DecimalValue(DecimalValue { scale: 2, value: 1234 }),
        );
        table.insert("x-short".into(), AMQPValue::ShortString("short".into()));
        table.insert(
            "x-binary-text".into(),
            AMQPValue::LongString(vec![0xffu8, 0xfe, 0x00].into()),
        );
        table.insert("x-bytes".into(), AMQPValue::ByteArray(ByteArray::from(vec![1u8, 2, 3])));
        table.insert("x-void".into(), AMQPValue::Void);

        let properties = BasicProperties::default().with_headers(table.clone());
        let headers = headers_from_properties(&properties);

        assert_eq!(headers.routing_metadata().retry_count, 2);
        assert_eq!(to_field_table(&headers), table);
    }

    #[test]
    fn test_missing_header_table() {
        assert!(headers_from_properties(&BasicProperties::default()).is_empty());
    }
}
