//! Integration tests against a live Disque node.
//!
//! Most tests need a reachable node: 127.0.0.1:7711 unless `DISQUE_NODES`
//! says otherwise.
//! Run with: cargo test --test disque_integration -- --ignored

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use disque_affinity::{DisqueClient, DisqueError, DisquePool, PoolConfig, PushOptions};

async fn connected_client() -> DisqueClient {
    let mut client = DisqueClient::from_env().expect("valid DISQUE_* settings");
    client
        .initialize()
        .await
        .expect("Disque must be reachable at DISQUE_NODES or 127.0.0.1:7711");
    client
}

/// A queue name no other test run has used.
fn unique_queue(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{name}-{nanos}")
}

#[tokio::test]
async fn test_initialize_without_reachable_seed() {
    let mut client = DisqueClient::new(vec!["127.0.0.1:8800".to_string()], 1000);

    let result = client.initialize().await;

    assert!(matches!(result, Err(DisqueError::NoNodesAvailable)));
    assert!(client.topology().is_empty());
}

#[tokio::test]
#[ignore] // Run with: cargo test --test disque_integration -- --ignored
async fn test_initialize_single_node() {
    let client = connected_client().await;

    assert_eq!(client.topology().len(), 1);
    assert!(client.current_prefix().is_some());
    assert!(client.cycle_length() >= 1);
}

#[tokio::test]
#[ignore]
async fn test_push_then_fetch() {
    let mut client = connected_client().await;
    let queue = unique_queue("q1");

    let id = client
        .push(&queue, "asdf", Duration::from_secs(1))
        .await
        .expect("push");
    assert!(!id.is_empty());

    let jobs = client
        .fetch(&queue, 1, Duration::from_secs(1))
        .await
        .expect("fetch");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].body, "asdf");
    assert_eq!(jobs[0].id, id);

    // Owning node is counted.
    let prefix = jobs[0].node_prefix().expect("broker id has a prefix");
    assert_eq!(client.stats().get(prefix), 1);

    client.ack(&id).await.expect("ack");
}

#[tokio::test]
#[ignore]
async fn test_nack_increments_counter() {
    let mut client = connected_client().await;
    let queue = unique_queue("nack");

    client
        .push(&queue, "retry me", Duration::from_secs(1))
        .await
        .expect("push");

    let first = client
        .fetch_one(&queue, Duration::from_secs(1))
        .await
        .expect("fetch")
        .expect("job available");
    assert_eq!(first.nacks, 0);

    client.nack(&first.id).await.expect("nack");

    let second = client
        .fetch_one(&queue, Duration::from_secs(1))
        .await
        .expect("fetch")
        .expect("job requeued");
    assert_eq!(second.id, first.id);
    assert_eq!(second.nacks, 1);

    client.ack(&second.id).await.expect("ack");
}

#[tokio::test]
#[ignore]
async fn test_push_options_and_details() {
    let mut client = connected_client().await;
    let queue = unique_queue("show");

    let options = PushOptions::new()
        .ttl(Duration::from_secs(120))
        .retry(Duration::from_secs(30));
    let id = client
        .push_with_options(&queue, "inspect", Duration::from_secs(1), &options)
        .await
        .expect("push");

    let details = client.job_details(&id).await.expect("show");
    assert_eq!(details.id, id);
    assert_eq!(details.queue, queue);
    assert_eq!(details.body, "inspect");
    assert_eq!(details.retry, Duration::from_secs(30));
    assert!(details.ttl <= Duration::from_secs(120));

    assert_eq!(client.queue_length(&queue).await.expect("qlen"), 1);

    client.delete(&id).await.expect("delete");
    assert!(matches!(
        client.job_details(&id).await,
        Err(DisqueError::JobNotFound(_))
    ));
    assert_eq!(client.queue_length(&queue).await.expect("qlen"), 0);
}

#[tokio::test]
#[ignore]
async fn test_fetch_no_hang_on_empty_queue() {
    let mut client = connected_client().await;
    let queue = unique_queue("empty");

    let jobs = client.fetch_no_hang(&queue, 5).await.expect("fetch");
    assert!(jobs.is_empty());
    assert!(client.stats().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_close_then_reconnect() {
    let mut client = connected_client().await;
    client.close();

    let queue = unique_queue("reconnect");
    let id = client
        .push(&queue, "again", Duration::from_secs(1))
        .await
        .expect("push recovers");
    client.delete(&id).await.expect("delete");
}

#[tokio::test]
#[ignore]
async fn test_pool_round_trip() {
    let pool = DisquePool::from_env(PoolConfig::new(2, 4)).expect("config");
    let queue = unique_queue("pool");

    let mut client = pool.get().await.expect("client");
    let id = client
        .push(&queue, "pooled", Duration::from_secs(1))
        .await
        .expect("push");
    pool.put(client).await;

    let mut client = pool.get().await.expect("reused client");
    client.delete(&id).await.expect("delete");
    pool.put(client).await;

    let stats = pool.stats().await;
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.in_use, 0);

    pool.close().await;
    assert!(pool.is_closed());
}
