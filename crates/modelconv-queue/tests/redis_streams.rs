//! Redis integration tests.
//!
//! Require a running Redis. Run with:
//!   REDIS_URL=redis://localhost:6379 cargo test -p modelconv-queue --test redis_streams -- --ignored

use std::time::Duration;

use modelconv_queue::{IntakeChannel, JobQueue, NotificationChannel, NotificationStream, QueueConfig};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

fn unique(name: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("modelconv:test:{}:{}", name, nanos)
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_receive_then_delete() {
    let queue = JobQueue::new(QueueConfig::new(redis_url(), unique("intake")), "test-consumer").unwrap();
    queue.init().await.unwrap();

    let id = queue.enqueue(r#"{"jobId":"j1"}"#).await.unwrap();
    let received = queue.receive(1, Duration::from_millis(500)).await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id, id);
    assert_eq!(received[0].body, r#"{"jobId":"j1"}"#);
    assert_eq!(received[0].delivery_count, 1);

    queue.delete(&id).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_undeleted_message_is_reclaimed() {
    let config = QueueConfig::new(redis_url(), unique("reclaim"));
    let first = JobQueue::new(config.clone(), "crashed-consumer").unwrap();
    first.init().await.unwrap();
    first.enqueue(r#"{"jobId":"j2"}"#).await.unwrap();
    assert_eq!(first.receive(1, Duration::from_millis(500)).await.unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = JobQueue::new(config, "rescuer").unwrap();
    let reclaimed = second.reclaim_stale(Duration::from_millis(10), 10).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].delivery_count, 2);

    second.dead_letter(&reclaimed[0], "test").await.unwrap();
    assert_eq!(second.dlq_len().await.unwrap(), 1);
    assert_eq!(second.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_touched_message_is_not_reclaimed() {
    let config = QueueConfig::new(redis_url(), unique("touch"));
    let worker = JobQueue::new(config.clone(), "busy-consumer").unwrap();
    worker.init().await.unwrap();
    worker.enqueue(r#"{"jobId":"j3"}"#).await.unwrap();
    let received = worker.receive(1, Duration::from_millis(500)).await.unwrap();
    assert_eq!(received.len(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    worker.touch(&[received[0].id.clone()]).await.unwrap();

    let other = JobQueue::new(config, "other-consumer").unwrap();
    let reclaimed = other.reclaim_stale(Duration::from_millis(200), 10).await.unwrap();
    assert!(reclaimed.is_empty());

    worker.delete(&received[0].id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_notification_send() {
    let channel = NotificationStream::new(&redis_url(), unique("notify"))
        .unwrap()
        .with_max_len(100);
    let id = channel.send(r#"{"jobId":"j1","jobStatus":"completed"}"#).await.unwrap();
    assert!(!id.is_empty());
}
