use std::sync::Arc;

use bytes::Bytes;
use tempfile::tempdir;

use crate::broker::Broker;
use crate::config::BrokerSettings;
use crate::persistence::FileStore;

fn broker(dir: &std::path::Path) -> Broker {
    Broker::new(
        BrokerSettings::default(),
        Arc::new(FileStore::new(dir).unwrap()),
    )
}

#[tokio::test]
async fn test_subscription_reports_its_topic() {
    let dir = tempdir().unwrap();
    let broker = broker(dir.path());

    let plain = broker.subscribe("news", "", None).await.unwrap();
    let kept = broker.subscribe("h/news", "", None).await.unwrap();

    assert_eq!(plain.topic_key(), "news");
    assert!(!plain.history_enabled());
    assert_eq!(kept.topic_key(), "h/news");
    assert!(kept.history_enabled());
    assert_ne!(plain.id(), kept.id());
}

#[tokio::test]
async fn test_try_recv_on_empty_subscription() {
    let dir = tempdir().unwrap();
    let broker = broker(dir.path());

    let mut sub = broker.subscribe("quiet", "", None).await.unwrap();
    assert!(sub.try_recv().is_none());

    broker.publish("quiet", "", Bytes::from("ping")).await.unwrap();
    assert_eq!(sub.try_recv().unwrap().data, Bytes::from("ping"));
}

#[tokio::test]
async fn test_unsubscribe_closes_without_buffered_messages() {
    let dir = tempdir().unwrap();
    let broker = broker(dir.path());

    let sub = broker.subscribe("empty", "", None).await.unwrap();
    assert!(sub.unsubscribe().await.is_empty());
}
