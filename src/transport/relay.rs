//! Forwards coordinator output to a collector

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::model::Entry;
use crate::recording::{Coordinator, RecordingState, StateChange, Subscription};

use super::client::TransportClient;
use super::message::{StatusPayload, TransportMessage};

/// Wait for the relay task to drain on shutdown
const SHUTDOWN_TIMEOUT_MS: u64 = 5000;

/// Streams accepted entries and state changes through a [`TransportClient`]
///
/// Messages are built on the producer's thread inside the coordinator's
/// notification, so they are queued in sequence order. Messages the
/// collector could not take stay in a bounded buffer and are retried, in
/// order, when the next message arrives or the retry tick fires.
pub struct Relay {
    subscriptions: Vec<Subscription>,
    task: Option<JoinHandle<()>>,
}

impl Relay {
    /// Subscribe to `coordinator` and start forwarding
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        coordinator: &Coordinator,
        client: Arc<TransportClient>,
        config: &TransportConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let entry_tx = tx.clone();
        let (entries, states) = coordinator.attach(
            move |entry: &Arc<Entry>| {
                entry_tx
                    .send(TransportMessage::event(Entry::clone(entry)))
                    .ok();
            },
            move |change: &StateChange| {
                tx.send(status_message(change)).ok();
            },
        );

        let task = tokio::spawn(run(
            rx,
            client,
            config.max_pending.max(1),
            Duration::from_millis(config.retry_delay_ms.max(1)),
        ));

        Self {
            subscriptions: vec![entries, states],
            task: Some(task),
        }
    }

    /// Stop forwarding after a last delivery attempt of buffered messages
    pub async fn shutdown(mut self) {
        // Dropping the subscriptions closes the queue and ends the task.
        self.subscriptions.clear();

        if let Some(task) = self.task.take() {
            let timeout = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!("Relay did not drain within {:?}", timeout);
            }
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.subscriptions.clear();
    }
}

fn status_message(change: &StateChange) -> TransportMessage {
    TransportMessage::status(StatusPayload {
        recording: change.current == RecordingState::Recording,
        paused: change.current == RecordingState::Paused,
        entry_count: change.entry_count,
        target_application: change.target_application.clone(),
        session_id: change.session_id,
        configuration: change.configuration.clone(),
    })
}

struct Outbox {
    pending: VecDeque<TransportMessage>,
    max_pending: usize,
    reachable: bool,
}

impl Outbox {
    fn push(&mut self, message: TransportMessage) {
        if self.pending.len() >= self.max_pending {
            self.pending.pop_front();
            warn!(
                "Relay buffer full ({} messages), dropping oldest",
                self.max_pending
            );
        }
        self.pending.push_back(message);
    }

    async fn flush(&mut self, client: &TransportClient) {
        while let Some(message) = self.pending.front() {
            match client.send(message).await {
                Ok(()) => {
                    self.pending.pop_front();
                    if !self.reachable {
                        info!("Collector reachable again");
                        self.reachable = true;
                    }
                }
                Err(e) => {
                    if self.reachable {
                        warn!(
                            "could not reach collector, buffering locally: {}",
                            e
                        );
                        self.reachable = false;
                    } else {
                        debug!("Collector still unreachable: {}", e);
                    }
                    break;
                }
            }
        }
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<TransportMessage>,
    client: Arc<TransportClient>,
    max_pending: usize,
    retry_every: Duration,
) {
    let mut outbox = Outbox {
        pending: VecDeque::new(),
        max_pending,
        reachable: true,
    };
    let mut tick = tokio::time::interval(retry_every);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else { break };
                outbox.push(message);
                while let Ok(message) = rx.try_recv() {
                    outbox.push(message);
                }
                outbox.flush(&client).await;
            }
            _ = tick.tick(), if !outbox.pending.is_empty() => {
                outbox.flush(&client).await;
            }
        }
    }

    outbox.flush(&client).await;
    if !outbox.pending.is_empty() {
        warn!(
            "Relay stopped with {} undelivered messages",
            outbox.pending.len()
        );
    }
    debug!("Relay finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingConfig;
    use crate::transport::{MessageBody, ServerEvent, TransportServer};
    use tempfile::TempDir;

    fn coordinator() -> Arc<Coordinator> {
        Arc::new(Coordinator::new(RecordingConfig::default()).unwrap())
    }

    fn fast_config() -> TransportConfig {
        TransportConfig {
            connect_timeout_ms: 200,
            retry_delay_ms: 20,
            max_pending: 100,
        }
    }

    async fn collect_events(
        events: &mut mpsc::UnboundedReceiver<ServerEvent>,
        count: usize,
    ) -> Vec<TransportMessage> {
        let mut messages = Vec::new();
        while messages.len() < count {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let ServerEvent::Message(message) = event {
                messages.push(message);
            }
        }
        messages
    }

    #[tokio::test]
    async fn test_buffered_until_collector_appears() {
        let dir = TempDir::new().unwrap();
        let channel = dir.path().join("relay.sock");
        let channel = channel.to_str().unwrap();
        let config = fast_config();

        let coordinator = coordinator();
        let client = Arc::new(TransportClient::new(channel, &config));
        let relay = Relay::spawn(&coordinator, Arc::clone(&client), &config);

        coordinator.start(Some("buffered"), None);
        for i in 0..5 {
            coordinator
                .add_entry(Entry::custom("step", serde_json::json!(i)))
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!client.is_connected());

        let server = TransportServer::new(channel, &config);
        let mut events = server.start().unwrap();

        // initial status, start status, five events
        let messages = collect_events(&mut events, 7).await;
        let sequence: Vec<u64> = messages
            .iter()
            .filter_map(|m| m.entry())
            .map(|e| e.sequence_number)
            .collect();
        assert_eq!(sequence, vec![1, 2, 3, 4, 5]);
        assert!(matches!(
            &messages[1].body,
            MessageBody::Status(status) if status.recording
        ));

        relay.shutdown().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_spawn_during_recording_streams_contiguous_events() {
        let dir = TempDir::new().unwrap();
        let channel = dir.path().join("busy.sock");
        let channel = channel.to_str().unwrap();
        let config = TransportConfig {
            max_pending: 1000,
            ..fast_config()
        };

        let server = TransportServer::new(channel, &config);
        let mut events = server.start().unwrap();

        let coordinator = coordinator();
        let producer = {
            let coordinator = Arc::clone(&coordinator);
            tokio::task::spawn_blocking(move || {
                coordinator.start(Some("busy"), None);
                for i in 0..150 {
                    coordinator
                        .add_entry(Entry::custom("step", serde_json::json!(i)))
                        .unwrap();
                }
            })
        };
        let client = Arc::new(TransportClient::new(channel, &config));
        let relay = Relay::spawn(&coordinator, Arc::clone(&client), &config);
        producer.await.unwrap();
        coordinator.stop();

        let mut messages = Vec::new();
        loop {
            let message = collect_events(&mut events, 1).await.remove(0);
            let stopped = matches!(
                &message.body,
                MessageBody::Status(status) if !status.recording && status.session_id.is_some()
            );
            messages.push(message);
            if stopped {
                break;
            }
        }

        let MessageBody::Status(initial) = &messages[0].body else {
            panic!("first message must be a status");
        };
        let sequence: Vec<u64> = messages
            .iter()
            .filter_map(|m| m.entry())
            .map(|e| e.sequence_number)
            .collect();
        let expected: Vec<u64> = (initial.entry_count as u64 + 1..=150).collect();
        assert_eq!(sequence, expected);

        let MessageBody::Status(last) = &messages[messages.len() - 1].body else {
            panic!("last message must be a status");
        };
        assert_eq!(last.configuration, Some(RecordingConfig::default()));

        relay.shutdown().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_oldest_dropped_when_buffer_full() {
        let mut outbox = Outbox {
            pending: VecDeque::new(),
            max_pending: 2,
            reachable: true,
        };
        let messages: Vec<_> = (0..3).map(|_| TransportMessage::ping()).collect();
        for message in &messages {
            outbox.push(message.clone());
        }

        let kept: Vec<_> = outbox.pending.iter().map(|m| m.id).collect();
        assert_eq!(kept, vec![messages[1].id, messages[2].id]);
    }
}
