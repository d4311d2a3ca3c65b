//! The endpoint and the worker wired over one broker, with a transport that
//! takes its time.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::http::Method;
use courier_common::{
    Broker, ChannelName, DeliveryOutcome, MemoryDirectory, MemorySettings, OutgoingMessage,
    SettingValue, Signal, User, outcome::REASON_TIMEOUT,
};
use courier_delivery::{
    DeliveryWorker,
    worker::{SMTP_HOST, SMTP_PORT},
};
use courier_endpoint::{Caller, SendEndpoint, SendRequest};
use courier_smtp::{ClientError, SendError, Transport, TransportConnector};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::{sync::broadcast, time::Instant};

const DELAY: Duration = Duration::from_secs(4);

struct SlowTransport;

#[async_trait]
impl Transport for SlowTransport {
    async fn send(&mut self, _message: &OutgoingMessage) -> Result<(), SendError> {
        tokio::time::sleep(DELAY).await;
        Ok(())
    }

    async fn close(&mut self) {}
}

struct SlowConnector;

#[async_trait]
impl TransportConnector for SlowConnector {
    async fn connect(&self, _host: &str, _port: u16) -> Result<Box<dyn Transport>, ClientError> {
        Ok(Box::new(SlowTransport))
    }
}

fn settings() -> MemorySettings {
    MemorySettings::new()
        .with(SMTP_HOST, SettingValue::String("mail.example.com".into()))
        .with(SMTP_PORT, SettingValue::Integer(25))
        .with("system.email", SettingValue::String("noreply@example.com".into()))
}

async fn pipeline(broker: &Broker, timeout: Duration) -> (SendEndpoint, broadcast::Sender<Signal>) {
    let settings = Arc::new(settings());
    let directory = Arc::new(MemoryDirectory::new([User {
        name: "alice".into(),
        fullname: "Alice Example".into(),
        email: Some("alice@example.com".into()),
    }]));

    let worker = DeliveryWorker::new(broker, directory, settings.clone(), Arc::new(SlowConnector));
    let (shutdown, receiver) = broadcast::channel(1);
    tokio::spawn(worker.run(receiver));

    let endpoint = SendEndpoint::new(broker.clone(), settings.as_ref())
        .await
        .unwrap()
        .with_timeout(timeout);

    (endpoint, shutdown)
}

fn request(message_id: &str) -> SendRequest {
    SendRequest::from_body(
        Method::POST,
        json!({"recipient": "alice", "subject": "Slow", "message_id": message_id}).to_string(),
        Caller::Administrator,
    )
}

#[tokio::test(start_paused = true)]
async fn test_outcome_published_after_a_slow_send_is_received() {
    let broker = Broker::new();
    let (endpoint, shutdown) = pipeline(&broker, Duration::from_secs(10)).await;
    let start = Instant::now();

    let outcome = endpoint.send_email(request("slow-1")).await.unwrap();

    assert_eq!(outcome, Some(DeliveryOutcome::sent("slow-1")));
    assert!(start.elapsed() >= DELAY);
    assert_eq!(broker.subscriber_count(&ChannelName::delivery("slow-1")), 0);

    shutdown.send(Signal::Shutdown).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_send_slower_than_the_wait_times_out() {
    let broker = Broker::new();
    let (endpoint, shutdown) = pipeline(&broker, Duration::from_secs(1)).await;

    let outcome = endpoint.send_email(request("slow-2")).await.unwrap().unwrap();

    assert_eq!(outcome.message_id, "slow-2");
    assert!(!outcome.sent);
    assert_eq!(outcome.reason.as_deref(), Some(REASON_TIMEOUT));
    assert_eq!(broker.subscriber_count(&ChannelName::delivery("slow-2")), 0);

    shutdown.send(Signal::Shutdown).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_messages_are_delivered_in_order() {
    let broker = Broker::new();
    let (endpoint, shutdown) = pipeline(&broker, Duration::from_secs(30)).await;
    let endpoint = Arc::new(endpoint);
    let start = Instant::now();

    let first = tokio::spawn({
        let endpoint = Arc::clone(&endpoint);
        async move { endpoint.send_email(request("first")).await.unwrap() }
    });
    tokio::task::yield_now().await;
    let second = tokio::spawn({
        let endpoint = Arc::clone(&endpoint);
        async move {
            let outcome = endpoint.send_email(request("second")).await.unwrap();
            (outcome, Instant::now())
        }
    });

    assert_eq!(first.await.unwrap(), Some(DeliveryOutcome::sent("first")));
    let (outcome, finished) = second.await.unwrap();
    assert_eq!(outcome, Some(DeliveryOutcome::sent("second")));
    assert!(finished - start >= DELAY * 2);

    shutdown.send(Signal::Shutdown).unwrap();
}
