//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册消费链路的指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("mailer_batches_total", "Total number of pulled non-empty batches");
    metrics::describe_counter!(
        "mailer_messages_total",
        "Total number of Pub/Sub messages handled, labelled by status"
    );
    metrics::describe_counter!(
        "mailer_emails_dispatched_total",
        "Total number of dispatched e-mail messages"
    );
    metrics::describe_counter!("mailer_acks_total", "Total number of subscription seeks");
    metrics::describe_counter!(
        "mailer_pubsub_errors_total",
        "Total number of failed Pub/Sub pull/seek requests, labelled by operation"
    );
    metrics::describe_histogram!(
        "mailer_batch_duration_seconds",
        "Time spent decoding and routing one batch"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一个批次处理完成并已确认
#[inline]
pub fn record_batch(message_count: usize, dispatched: usize, duration_secs: f64) {
    metrics::counter!("mailer_batches_total").increment(1);
    metrics::counter!("mailer_messages_total", "status" => "processed")
        .increment(message_count as u64);
    metrics::counter!("mailer_emails_dispatched_total").increment(dispatched as u64);
    metrics::counter!("mailer_acks_total").increment(1);
    metrics::histogram!("mailer_batch_duration_seconds").record(duration_secs);
}

/// 记录 Pub/Sub 请求失败，`operation` 为 pull / seek，与消息处理失败分开计数
#[inline]
pub fn record_pubsub_error(operation: &'static str) {
    metrics::counter!("mailer_pubsub_errors_total", "operation" => operation).increment(1);
}

/// 记录单条消息处理失败，`kind` 为 decode / delivery
#[inline]
pub fn record_message_failure(kind: &str) {
    metrics::counter!(
        "mailer_messages_total",
        "status" => "failed",
        "kind" => kind.to_string()
    )
    .increment(1);
}
