//! End-to-end tests for the capture, correlate and relay pipeline

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use proptest::prelude::*;
use tempfile::TempDir;
use tokio::net::TcpListener;

use tracewire::collector::Collector;
use tracewire::config::{RecordingConfig, TransportConfig};
use tracewire::intercept::RecordingClient;
use tracewire::model::{
    ControlIdentity, Entry, EntryKind, InteractionAction, InteractionPayload, TargetDescriptor,
};
use tracewire::recording::{CaptureSink, Coordinator, RecordingState};
use tracewire::transport::{Relay, ServerEvent, TransportClient, TransportMessage, TransportServer};

fn transport_config() -> TransportConfig {
    TransportConfig {
        connect_timeout_ms: 500,
        retry_delay_ms: 20,
        max_pending: 1000,
    }
}

fn click(control: &str) -> Entry {
    Entry::interaction(InteractionPayload {
        action: InteractionAction::Click,
        control: ControlIdentity {
            id: control.to_string(),
            control_type: Some("button".to_string()),
            ..Default::default()
        },
        before_value: None,
        after_value: None,
        window: Some("Orders".to_string()),
    })
}

/// Echo server answering every request with a small JSON document
async fn spawn_http_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| async move {
                    let body = req.into_body().collect().await?.to_bytes();
                    let reply = format!(r#"{{"received":{},"session_token":"abc"}}"#, body.len());
                    Ok::<_, hyper::Error>(
                        Response::builder()
                            .status(201)
                            .header("content-type", "application/json")
                            .header("set-cookie", "sid=42")
                            .body(Full::new(Bytes::from(reply)))
                            .unwrap(),
                    )
                });
                http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                    .ok();
            });
        }
    });

    addr
}

#[tokio::test]
async fn test_pipeline_delivers_every_entry_in_order() {
    let dir = TempDir::new().unwrap();
    let channel = dir.path().join("pipeline.sock");
    let channel = channel.to_str().unwrap();
    let config = transport_config();

    let server = TransportServer::new(channel, &config);
    let events = server.start().unwrap();
    let collector = tokio::spawn(Collector::new().run(events));

    let coordinator = Arc::new(Coordinator::new(RecordingConfig::default()).unwrap());
    let client = Arc::new(TransportClient::new(channel, &config));
    let relay = Relay::spawn(&coordinator, Arc::clone(&client), &config);

    let http = spawn_http_server().await;
    let recording_client = RecordingClient::new(Arc::clone(&coordinator));

    coordinator.start(
        Some("checkout"),
        Some(TargetDescriptor {
            process_name: "orders-app".to_string(),
            process_id: None,
            window_title: None,
        }),
    );

    let action = coordinator.new_correlation_id();
    coordinator.add_entry(click("submit").with_correlation(action.clone())).unwrap();
    let response = recording_client
        .post(
            &format!("http://{http}/orders?api_key=k1&item=7"),
            &[("content-type", "application/json"), ("authorization", "Bearer s3cret")],
            r#"{"item":7,"password":"hunter2"}"#,
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.body().as_ref(), br#"{"received":31,"session_token":"abc"}"#);
    coordinator.clear_correlation_id();

    coordinator
        .add_entry(Entry::custom("checkpoint", serde_json::json!({ "step": "done" })))
        .unwrap();
    let recorded = coordinator.stop().unwrap();
    assert_eq!(recorded.entries.len(), 4);

    relay.shutdown().await;
    client.disconnect().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.stop().await;
    let collector = collector.await.unwrap();

    let session = collector.session("checkout");
    assert_eq!(session.id, recorded.id);
    assert!(session.is_finalized());
    assert_eq!(session.target.as_ref().unwrap().process_name, "orders-app");

    let received: Vec<_> = session.entries.iter().map(|e| (e.id, e.sequence_number)).collect();
    let expected: Vec<_> = recorded.entries.iter().map(|e| (e.id, e.sequence_number)).collect();
    assert_eq!(received, expected);

    let kinds: Vec<_> = session.entries.iter().map(Entry::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EntryKind::Interaction,
            EntryKind::OutgoingRequest,
            EntryKind::OutgoingResponse,
            EntryKind::Custom,
        ]
    );

    // The HTTP pair inherits the click's correlation id
    let groups = session.correlation_groups();
    assert_eq!(groups[action.as_str()].len(), 3);

    let request = session.entries[1].as_http().unwrap();
    assert_eq!(request.query["api_key"], "***");
    assert!(request.url.ends_with("/orders?api_key=***&item=7"));
    assert_eq!(request.query["item"], "7");
    assert_eq!(request.headers.as_ref().unwrap()["authorization"], "***");
    let body = request.body.as_deref().unwrap();
    assert!(!body.contains("hunter2"));

    let response = session.entries[2].as_http().unwrap();
    assert_eq!(response.pair_id, request.pair_id);
    assert_eq!(response.status_code, Some(201));
    assert!(response.success);
    assert_eq!(response.headers.as_ref().unwrap()["set-cookie"], "***");
    assert!(!response.body.as_deref().unwrap().contains("abc"));

    let stored = tracewire::storage::to_string(&session).unwrap();
    for secret in ["api_key=k1", "s3cret", "hunter2", "sid=42"] {
        assert!(!stored.contains(secret), "{secret} stored in clear");
    }
}

#[tokio::test]
async fn test_send_while_disconnected_reconnects_once() {
    let dir = TempDir::new().unwrap();
    let channel = dir.path().join("reconnect.sock");
    let channel = channel.to_str().unwrap();
    let config = transport_config();
    let client = TransportClient::new(channel, &config);

    let message = TransportMessage::event(click("first"));
    assert!(client.send(&message).await.is_err());
    assert_eq!(client.connect_attempts(), 1);
    assert!(!client.is_connected());

    let server = TransportServer::new(channel, &config);
    let mut events = server.start().unwrap();

    client.send(&message).await.unwrap();
    assert_eq!(client.connect_attempts(), 2);
    client.send(&TransportMessage::ping()).await.unwrap();
    assert_eq!(client.connect_attempts(), 2);
    client.disconnect().await;

    let mut messages = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ServerEvent::Message(message) => messages.push(message),
            ServerEvent::Error(e) => panic!("unexpected transport error: {e}"),
            ServerEvent::Disconnected => break,
            ServerEvent::Connected => {}
        }
    }

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id, message.id);
    assert_eq!(messages[1].message_type(), "ping");

    server.stop().await;
}

#[tokio::test]
async fn test_pause_and_excluded_urls_are_not_recorded() {
    let mut config = RecordingConfig::default();
    config.excluded_url_patterns = vec!["*/health".to_string()];
    let coordinator = Arc::new(Coordinator::new(config).unwrap());
    let http = spawn_http_server().await;
    let client = RecordingClient::new(Arc::clone(&coordinator));

    coordinator.start(None, None);
    client.get(&format!("http://{http}/health")).await.unwrap();
    assert_eq!(coordinator.entry_count(), 0);

    coordinator.pause().unwrap();
    client.get(&format!("http://{http}/orders")).await.unwrap();
    assert_eq!(coordinator.entry_count(), 0);

    coordinator.resume().unwrap();
    client.get(&format!("http://{http}/orders")).await.unwrap();
    assert_eq!(coordinator.entry_count(), 2);
}

#[test]
fn test_saved_session_loads_into_fresh_coordinator() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sessions").join("saved.json");

    let original = Coordinator::new(RecordingConfig::default()).unwrap();
    original.start(Some("persisted"), None);
    original.add_entry(click("a")).unwrap();
    original.add_entry(Entry::custom("note", serde_json::json!("x"))).unwrap();
    original.stop();
    original.save(&path).unwrap();

    let restored = Coordinator::new(RecordingConfig::default()).unwrap();
    let session = restored.load(&path).unwrap();
    assert_eq!(session.name, "persisted");
    assert_eq!(restored.state(), RecordingState::Idle);

    let kinds: Vec<_> = restored.entries().iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec![EntryKind::Interaction, EntryKind::Custom]);
}

#[test]
fn test_capture_sink_applies_filter() {
    let coordinator = Coordinator::new(RecordingConfig::default()).unwrap();
    coordinator.start(None, None);
    let sink: &dyn CaptureSink = &coordinator;

    let edit = || {
        Entry::interaction(InteractionPayload {
            action: InteractionAction::ValueChanged,
            control: ControlIdentity {
                id: "search".to_string(),
                ..Default::default()
            },
            before_value: Some("a".to_string()),
            after_value: Some("ab".to_string()),
            window: None,
        })
    };

    sink.submit(edit());
    sink.submit(edit());
    sink.submit(click("go"));

    assert_eq!(coordinator.entry_count(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_concurrent_producers_get_contiguous_sequence(
        threads in 1usize..6,
        per_thread in 1usize..40,
    ) {
        let coordinator = Coordinator::new(RecordingConfig::default()).unwrap();
        coordinator.start(None, None);

        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        let _subscription = coordinator.subscribe_entries(move |entry: &Arc<Entry>| {
            sink.lock().push(entry.sequence_number);
        });

        std::thread::scope(|scope| {
            for t in 0..threads {
                let coordinator = &coordinator;
                scope.spawn(move || {
                    for i in 0..per_thread {
                        coordinator
                            .add_entry(Entry::custom("p", serde_json::json!([t, i])))
                            .unwrap();
                    }
                });
            }
        });

        let total = (threads * per_thread) as u64;
        let expected: Vec<u64> = (1..=total).collect();

        let sequence: Vec<u64> = coordinator.entries().iter().map(|e| e.sequence_number).collect();
        prop_assert_eq!(&sequence, &expected);
        prop_assert_eq!(&*observed.lock(), &expected);
    }
}
