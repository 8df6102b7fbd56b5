//! test_utils 模块的集成测试
//!
//! 验证 Mock 订阅的脚本化行为，消费循环的测试都依赖这些行为。

use chrono::Duration;
use mailer_shared::error::MailerError;
use mailer_shared::pubsub::SubscriptionClient;
use mailer_shared::test_utils::*;

// ==================== 消息构造测试 ====================

#[test]
fn test_base_publish_time_is_fixed() {
    assert_eq!(
        base_publish_time().to_rfc3339(),
        "2019-05-13T18:31:17.926+00:00"
    );
}

#[test]
fn test_message_batch_publish_times_increase() {
    let start = base_publish_time();
    let batch = message_batch(&["a".to_string(), "b".to_string(), "c".to_string()], start);

    assert_eq!(batch.len(), 3);
    assert_eq!(batch[0].publish_time(), start);
    assert_eq!(batch[2].publish_time(), start + Duration::seconds(2));
    assert_eq!(batch[1].message.data, "b");
}

#[test]
fn test_received_messages_have_unique_ids() {
    let first = received_message("x", base_publish_time());
    let second = received_message("x", base_publish_time());
    assert_ne!(first.ack_id, second.ack_id);
    assert_ne!(first.message.message_id, second.message.message_id);
}

// ==================== Mock 订阅测试 ====================

#[tokio::test]
async fn test_mock_subscription_replays_batches_then_empty() {
    let start = base_publish_time();
    let subscription = MockSubscription::new(vec![
        message_batch(&["a".to_string()], start),
        message_batch(&["b".to_string(), "c".to_string()], start),
    ]);

    assert_eq!(subscription.pull(10).await.unwrap().len(), 1);
    assert_eq!(subscription.pull(10).await.unwrap().len(), 2);
    assert!(subscription.pull(10).await.unwrap().is_empty());
    assert!(subscription.pull(10).await.unwrap().is_empty());
    assert_eq!(subscription.pull_count(), 4);
}

#[tokio::test]
async fn test_mock_subscription_honours_max_messages() {
    let payloads: Vec<String> = (0..5).map(|i| format!("m{i}")).collect();
    let subscription = MockSubscription::new(vec![message_batch(&payloads, base_publish_time())]);

    let first = subscription.pull(2).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].message.data, "m0");

    // 未取走的消息仍在订阅中排队
    let second = subscription.pull(2).await.unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(second[0].message.data, "m2");

    let third = subscription.pull(2).await.unwrap();
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].message.data, "m4");

    assert!(subscription.pull(2).await.unwrap().is_empty());
    assert_eq!(subscription.requested_sizes(), vec![2, 2, 2, 2]);
}

#[tokio::test]
async fn test_mock_subscription_records_seeks() {
    let subscription = MockSubscription::empty();
    let t = base_publish_time();

    subscription.seek(t).await.unwrap();
    subscription.seek(t + Duration::seconds(1)).await.unwrap();

    assert_eq!(subscription.seeks(), vec![t, t + Duration::seconds(1)]);
    assert_eq!(
        subscription.subscription().to_string(),
        "projects/test-project/subscriptions/test-mailer"
    );
}

#[tokio::test]
async fn test_mock_subscription_failures() {
    let subscription = MockSubscription::empty().failing_pull_at(2).failing_seek();

    assert!(subscription.pull(1).await.is_ok());
    let pull_err = subscription.pull(1).await.unwrap_err();
    assert!(matches!(pull_err, MailerError::Transport { .. }));
    assert!(pull_err.is_retryable());

    let seek_err = subscription.seek(base_publish_time()).await.unwrap_err();
    assert!(matches!(
        seek_err,
        MailerError::PubSubStatus { status: 503, .. }
    ));
    assert!(subscription.seeks().is_empty());
}
