//! 可观测性模块集成测试
//!
//! 覆盖指标记录函数和日志初始化的全局行为。

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use mailer_shared::observability::metrics::{
        record_batch, record_message_failure, record_pubsub_error,
    };

    #[test]
    fn test_record_batch() {
        record_batch(1, 1, 0.01);
        record_batch(1000, 2400, 3.5);
        // 没有任何收件人的批次同样会被确认
        record_batch(12, 0, 0.2);
    }

    #[test]
    fn test_record_message_failure_kinds() {
        for kind in ["decode", "delivery"] {
            record_message_failure(kind);
        }
    }

    #[test]
    fn test_record_pubsub_error_operations() {
        record_pubsub_error("pull");
        record_pubsub_error("seek");
    }
}

// ============================================================================
// 日志初始化测试
// ============================================================================

mod tracing_tests {
    use mailer_shared::config::ObservabilityConfig;
    use mailer_shared::observability;

    #[tokio::test]
    async fn test_init_only_once_per_process() {
        let config = ObservabilityConfig {
            log_format: "json".to_string(),
            log_level: "debug".to_string(),
            ..Default::default()
        };

        let guard = observability::init("notification-worker", &config).await;
        assert!(guard.is_ok());

        // 全局 subscriber 已安装，重复初始化返回错误而不是 panic
        let second = observability::init("notification-worker", &config).await;
        assert!(second.is_err());

        tracing::info!(batch = 1, "日志初始化后可以正常输出");
    }

    #[test]
    fn test_empty_guard_drops_quietly() {
        let guard = observability::ObservabilityGuard::empty();
        drop(guard);
    }
}
