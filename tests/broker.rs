// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! End-to-end scenarios against a live RabbitMQ broker, configured through the
//! `MESSAGEQUEUE_*` environment variables. Run with `cargo test -- --ignored`.

use chrono::{DateTime, Utc};
use lapin::{
    options::{QueueDeclareOptions, QueueDeleteOptions},
    types::FieldTable,
    Connection, ConnectionProperties,
};
use messagequeue::{
    client::MessageQueueClient,
    config::RabbitMQConfigs,
    connection::wait_for_availability,
    consumer::{DeliveryOutcome, HandlerError},
    errors::AmqpError,
    naming, testing, topics,
};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::mpsc, time::sleep};

const SERVICE_A: &str = "test-service-a";
const SERVICE_B: &str = "test-service-b";
const TOPIC: &str = topics::PROBAND_CREATED;
const POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProbandCreated {
    pseudonym: String,
    study_name: String,
}

fn proband() -> ProbandCreated {
    ProbandCreated {
        pseudonym: "test".to_owned(),
        study_name: "test".to_owned(),
    }
}

fn configs() -> RabbitMQConfigs {
    RabbitMQConfigs::load().expect("broker configuration")
}

async fn admin_connection() -> Connection {
    let cfg = configs();
    wait_for_availability(&cfg).await;
    Connection::connect(&cfg.uri(), ConnectionProperties::default())
        .await
        .expect("admin connection")
}

/// Deletes the queues of both test services so every scenario starts empty.
async fn reset_queues(topic: &str) {
    let conn = admin_connection().await;
    let channel = conn.create_channel().await.expect("admin channel");

    for service in [SERVICE_A, SERVICE_B] {
        for queue in [
            naming::queue_name(topic, service),
            naming::dead_letter_queue_name(topic, service),
        ] {
            channel
                .queue_delete(&queue, QueueDeleteOptions::default())
                .await
                .expect("queue delete");
        }
    }

    let _ = conn.close(200, "reset").await;
}

/// Number of messages waiting in `queue`, 0 if it doesn't exist.
async fn message_count(queue: &str) -> u32 {
    let conn = admin_connection().await;
    let count = match conn.create_channel().await {
        Ok(channel) => channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|q| q.message_count())
            .unwrap_or(0),
        Err(_) => 0,
    };
    let _ = conn.close(200, "count").await;
    count
}

async fn queue_exists(queue: &str) -> bool {
    let conn = admin_connection().await;
    let channel = conn.create_channel().await.expect("admin channel");
    let exists = channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                passive: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .is_ok();
    let _ = conn.close(200, "exists").await;
    exists
}

async fn connected(service: &str) -> MessageQueueClient {
    let client = MessageQueueClient::new(service, configs());
    client.connect(true).await.expect("connect");
    client
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done() {
            sleep(POLL).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn connect_and_disconnect() {
    let client = MessageQueueClient::new(SERVICE_A, configs());

    assert!(!client.is_connected());
    client.connect(true).await.unwrap();
    assert!(client.is_connected());
    client.disconnect().await.unwrap();
    assert!(!client.is_connected());

    client.connect(false).await.unwrap();
    client.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn connect_twice_fails() {
    let client = connected(SERVICE_A).await;

    assert_eq!(client.connect(true).await, Err(AmqpError::AlreadyConnected));
    assert!(client.is_connected());

    client.disconnect().await.unwrap();
    assert_eq!(client.disconnect().await, Err(AmqpError::NotConnected));
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn publish_and_consume() {
    reset_queues(TOPIC).await;
    let mq1 = connected(SERVICE_A).await;
    let mq2 = connected(SERVICE_A).await;

    let (tx, mut rx) = mpsc::unbounded_channel::<(ProbandCreated, DateTime<Utc>)>();
    mq2.create_consumer::<ProbandCreated, _>(
        TOPIC,
        move |msg: ProbandCreated, ts: DateTime<Utc>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((msg, ts));
                Ok::<(), HandlerError>(())
            }
        },
    )
    .await
    .unwrap();

    let producer = mq1.create_producer::<ProbandCreated>(TOPIC).await.unwrap();
    assert!(producer.publish(&proband()).await.unwrap());

    let (msg, ts) = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg, proband());
    assert!(ts <= Utc::now());

    mq1.disconnect().await.unwrap();
    mq2.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn fanout_reaches_every_service_once() {
    reset_queues(TOPIC).await;
    let producer_client = connected(SERVICE_A).await;
    let mut consumers = vec![];
    let received_a = Arc::new(AtomicUsize::new(0));
    let received_b = Arc::new(AtomicUsize::new(0));

    for (service, counter) in [
        (SERVICE_A, &received_a),
        (SERVICE_A, &received_a),
        (SERVICE_B, &received_b),
        (SERVICE_B, &received_b),
    ] {
        let client = connected(service).await;
        let counter = counter.clone();
        client
            .create_consumer::<ProbandCreated, _>(
                TOPIC,
                move |_: ProbandCreated, _: DateTime<Utc>| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<(), HandlerError>(())
                    }
                },
            )
            .await
            .unwrap();
        consumers.push(client);
    }

    let producer = producer_client
        .create_producer::<ProbandCreated>(TOPIC)
        .await
        .unwrap();
    let count = 10;
    for _ in 0..count {
        producer.publish(&proband()).await.unwrap();
    }

    wait_until(|| {
        received_a.load(Ordering::SeqCst) == count && received_b.load(Ordering::SeqCst) == count
    })
    .await;

    producer_client.disconnect().await.unwrap();
    for client in consumers {
        client.disconnect().await.unwrap();
    }
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn failed_message_is_retried_once() {
    reset_queues(TOPIC).await;
    let mq1 = connected(SERVICE_A).await;
    let mq2 = connected(SERVICE_A).await;
    let received = Arc::new(AtomicUsize::new(0));

    let counter = received.clone();
    mq2.create_consumer::<ProbandCreated, _>(TOPIC, move |_: ProbandCreated, _: DateTime<Utc>| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err::<(), HandlerError>("test error".into());
            }
            Ok(())
        }
    })
    .await
    .unwrap();

    let producer = mq1.create_producer::<ProbandCreated>(TOPIC).await.unwrap();
    producer.publish(&proband()).await.unwrap();

    wait_until(|| received.load(Ordering::SeqCst) == 2).await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(received.load(Ordering::SeqCst), 2);
    assert_eq!(
        message_count(&naming::dead_letter_queue_name(TOPIC, SERVICE_A)).await,
        0
    );

    mq1.disconnect().await.unwrap();
    mq2.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn failing_message_ends_in_dead_letter_queue() {
    reset_queues(TOPIC).await;
    let mq1 = connected(SERVICE_A).await;
    let mq2 = connected(SERVICE_A).await;
    let received = Arc::new(AtomicUsize::new(0));

    let counter = received.clone();
    mq1.create_consumer::<ProbandCreated, _>(TOPIC, move |_: ProbandCreated, _: DateTime<Utc>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), HandlerError>("test error".into())
        }
    })
    .await
    .unwrap();

    let producer = mq2.create_producer::<ProbandCreated>(TOPIC).await.unwrap();
    producer.publish(&proband()).await.unwrap();

    let dead_letter = naming::dead_letter_queue_name(TOPIC, SERVICE_A);
    tokio::time::timeout(Duration::from_secs(10), async {
        while message_count(&dead_letter).await != 1 {
            sleep(POLL).await;
        }
    })
    .await
    .unwrap();

    mq1.disconnect().await.unwrap();
    mq2.disconnect().await.unwrap();

    assert_eq!(received.load(Ordering::SeqCst), 2);
    assert_eq!(message_count(&naming::queue_name(TOPIC, SERVICE_A)).await, 0);
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn remove_missing_queue_succeeds() {
    let mq = connected(SERVICE_A).await;
    mq.remove_queue("some-non-existing-queue").await.unwrap();
    mq.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn remove_nonempty_queue_only_unbinds_it() {
    reset_queues(TOPIC).await;
    let queue = naming::queue_name(TOPIC, SERVICE_A);
    let received = Arc::new(AtomicUsize::new(0));

    let mq1 = connected(SERVICE_A).await;
    let counter = received.clone();
    mq1.create_consumer::<ProbandCreated, _>(TOPIC, move |_: ProbandCreated, _: DateTime<Utc>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), HandlerError>(())
        }
    })
    .await
    .unwrap();
    mq1.disconnect().await.unwrap();

    let mq2 = connected(SERVICE_B).await;
    let producer = mq2.create_producer::<ProbandCreated>(TOPIC).await.unwrap();
    producer.publish(&proband()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while message_count(&queue).await != 1 {
            sleep(POLL).await;
        }
    })
    .await
    .unwrap();

    let mq3 = connected(SERVICE_A).await;
    mq3.remove_queues(&[TOPIC]).await.unwrap();
    // a second removal finds the same nonempty, now unbound queue
    mq3.remove_queues(&[TOPIC]).await.unwrap();
    mq3.disconnect().await.unwrap();

    assert!(queue_exists(&queue).await);
    assert_eq!(message_count(&queue).await, 1);

    // unbound: new messages no longer reach it
    producer.publish(&proband()).await.unwrap();
    sleep(Duration::from_millis(200)).await;
    assert_eq!(message_count(&queue).await, 1);

    mq2.disconnect().await.unwrap();
    assert_eq!(received.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn remove_empty_queue_deletes_it() {
    reset_queues(TOPIC).await;
    let queue = naming::queue_name(TOPIC, SERVICE_A);

    let mq1 = connected(SERVICE_A).await;
    mq1.create_consumer::<ProbandCreated, _>(TOPIC, |_: ProbandCreated, _: DateTime<Utc>| async {
        Ok::<(), HandlerError>(())
    })
    .await
    .unwrap();
    mq1.disconnect().await.unwrap();
    assert!(queue_exists(&queue).await);

    let mq2 = connected(SERVICE_A).await;
    mq2.remove_queue(TOPIC).await.unwrap();
    mq2.disconnect().await.unwrap();

    assert!(!queue_exists(&queue).await);
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn messages_wait_for_a_consumer() {
    reset_queues(TOPIC).await;
    let mq1 = connected(SERVICE_A).await;
    mq1.create_consumer::<ProbandCreated, _>(TOPIC, |_: ProbandCreated, _: DateTime<Utc>| async {
        Ok::<(), HandlerError>(())
    })
    .await
    .unwrap();
    mq1.disconnect().await.unwrap();

    let mq2 = connected(SERVICE_B).await;
    let producer = mq2.create_producer::<ProbandCreated>(TOPIC).await.unwrap();
    producer.publish(&proband()).await.unwrap();

    let mq3 = connected(SERVICE_A).await;
    let processed = testing::inject_message_processed_awaiter::<ProbandCreated>(&mq3, TOPIC);
    mq3.create_consumer::<ProbandCreated, _>(TOPIC, |_: ProbandCreated, _: DateTime<Utc>| async {
        Ok::<(), HandlerError>(())
    })
    .await
    .unwrap();

    let processed = tokio::time::timeout(Duration::from_secs(10), processed)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(processed.message, proband());
    assert_eq!(processed.outcome, Ok(DeliveryOutcome::Acked));

    mq2.disconnect().await.unwrap();
    mq3.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn awaiters_observe_their_own_client() {
    reset_queues(TOPIC).await;
    let mq1 = connected(SERVICE_A).await;
    let mq2 = connected(SERVICE_B).await;
    let sandbox = testing::Sandbox::new();

    let on_a = sandbox.inject_message_processed_awaiter::<ProbandCreated>(&mq1, TOPIC);
    let on_b = sandbox.inject_message_processed_awaiter::<ProbandCreated>(&mq2, TOPIC);

    for client in [&mq1, &mq2] {
        client
            .create_consumer::<ProbandCreated, _>(TOPIC, |_: ProbandCreated, _: DateTime<Utc>| async {
                Ok::<(), HandlerError>(())
            })
            .await
            .unwrap();
    }

    let producer = mq1.create_producer::<ProbandCreated>(TOPIC).await.unwrap();
    producer.publish(&proband()).await.unwrap();

    let (a, b) = tokio::time::timeout(Duration::from_secs(10), async {
        (on_a.await, on_b.await)
    })
    .await
    .unwrap();
    assert_eq!(a.unwrap().message, proband());
    assert_eq!(b.unwrap().message, proband());

    sandbox.restore();
    mq1.disconnect().await.unwrap();
    mq2.disconnect().await.unwrap();
}
