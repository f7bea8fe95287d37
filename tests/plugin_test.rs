mod common;

use common::*;
use pubsub_sink::host::{ChunkDecoder, OutputPlugin};
use pubsub_sink::transport::{MemoryConnector, MemoryTransport, PubSubConnector};
use pubsub_sink::{FlushStatus, Record};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

fn keys(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn chunk(lines: &[&str]) -> Vec<u8> {
    let mut data = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let mut body = BTreeMap::new();
        body.insert("log", *line);
        data.extend(rmp_serde::to_vec(&(1_700_000_000i64 + i as i64, body)).unwrap());
    }
    data
}

#[tokio::test]
async fn test_plugin_lifecycle() {
    let credentials = credentials_file();
    let connector = MemoryConnector::new(Arc::new(MemoryTransport::new()));
    let path = credentials.path().to_string_lossy().to_string();
    let source = keys(&[
        ("project", TEST_PROJECT),
        ("topic", TEST_TOPIC),
        ("jwtpath", path.as_str()),
        ("Debug", "true"),
        ("DelayThreshold", "5"),
    ]);

    let result = OutputPlugin::init(&source, &connector).await;
    assert_eq!(OutputPlugin::init_status(&result), FlushStatus::Ok);
    let plugin = result.unwrap();
    assert!(plugin.keeper().debug());

    let status = plugin.flush(&chunk(&["one", "two", "three"]), "app.logs").await;
    assert_eq!(status, FlushStatus::Ok);
    assert_eq!(status.code(), 1);
    assert_eq!(connector.transport().published().len(), 3);

    assert_eq!(plugin.exit().await, FlushStatus::Ok);
}

#[tokio::test]
async fn test_init_without_keys_fails() {
    let connector = MemoryConnector::new(Arc::new(MemoryTransport::new()));

    let result = OutputPlugin::init(&keys(&[]), &connector).await;
    assert_eq!(OutputPlugin::init_status(&result), FlushStatus::Error);
    assert_eq!(connector.connect_count(), 0);
}

#[tokio::test]
async fn test_init_with_invalid_schema_type_fails() {
    let credentials = credentials_file();
    let connector = MemoryConnector::new(Arc::new(MemoryTransport::new()));
    let path = credentials.path().to_string_lossy().to_string();
    let source = keys(&[
        ("Project", TEST_PROJECT),
        ("Topic", TEST_TOPIC),
        ("JwtPath", path.as_str()),
        ("SchemaType", "Thrift"),
    ]);

    let result = OutputPlugin::init(&source, &connector).await;
    assert_eq!(OutputPlugin::init_status(&result), FlushStatus::Error);
}

#[tokio::test]
async fn test_malformed_tail_keeps_decoded_records() {
    let credentials = credentials_file();
    let connector = MemoryConnector::new(Arc::new(MemoryTransport::new()));
    let path = credentials.path().to_string_lossy().to_string();
    let source = keys(&[
        ("Project", TEST_PROJECT),
        ("Topic", TEST_TOPIC),
        ("JwtPath", path.as_str()),
    ]);
    let plugin = OutputPlugin::init(&source, &connector).await.unwrap();

    let mut data = chunk(&["kept"]);
    data.extend_from_slice(&[0x92, 0xc1]);

    assert_eq!(plugin.flush(&data, "app.logs").await, FlushStatus::Ok);
    assert_eq!(connector.transport().published().len(), 1);

    plugin.exit().await;
}

#[tokio::test]
#[ignore] // Run with: cargo test --test plugin_test -- --ignored (needs PROJECT_ID, TOPIC_NAME, JWT_PATH)
async fn test_publish_to_live_topic() {
    tracing_subscriber::fmt()
        .with_env_filter("pubsub_sink=debug")
        .try_init()
        .ok();

    let Some((project, topic, jwt_path)) = live_settings() else {
        eprintln!("PROJECT_ID, TOPIC_NAME and JWT_PATH must be set");
        return;
    };
    let source = keys(&[
        ("Project", project.as_str()),
        ("Topic", topic.as_str()),
        ("JwtPath", jwt_path.as_str()),
    ]);

    let plugin = OutputPlugin::init(&source, &PubSubConnector::from_env())
        .await
        .unwrap();

    let data = chunk(&["live-record-1", "live-record-2"]);
    let records: Vec<Record> = ChunkDecoder::new(&data).collect();
    assert_eq!(records.len(), 2);

    assert_eq!(plugin.flush(&data, "live").await, FlushStatus::Ok);
    assert_eq!(plugin.exit().await, FlushStatus::Ok);
}
