//! 通知工作者服务
//!
//! 拉取 Pub/Sub 订阅中积压的策略通知并投递邮件，订阅排空后退出。

use std::sync::Arc;

use mailer_shared::{config::AppConfig, observability, pubsub::PubSubRestClient};
use notification_worker::{
    consumer::PubSubMailConsumer, delivery::EmailDelivery, transport::LoggingTransport,
};
use tokio::{signal, sync::watch};
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "notification-worker";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load(SERVICE_NAME)?;
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        subscription = %config.pubsub.subscription,
        "Starting notification-worker..."
    );

    let client = Arc::new(PubSubRestClient::new(&config.pubsub)?);
    let delivery = Arc::new(EmailDelivery::new(
        config.mail.clone(),
        Arc::new(LoggingTransport),
    ));
    let consumer =
        PubSubMailConsumer::new(client, delivery).with_max_messages(config.pubsub.max_messages);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    match consumer.run(shutdown_rx).await {
        Ok(summary) => {
            info!(
                batches = summary.batches,
                messages = summary.messages,
                dispatched = summary.dispatched,
                interrupted = summary.interrupted,
                "notification-worker finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(kind = e.kind(), error = %e, "notification-worker aborted");
            Err(e.into())
        }
    }
}

/// 监听 Ctrl+C 和 SIGTERM，当前批次处理完后不再拉取新批次
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping after the current batch...");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping after the current batch...");
        }
    }
}
