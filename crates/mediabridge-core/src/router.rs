//! Engine callbacks, applied to the registry and republished as events.
//!
//! For each callback the registry is updated first, then any pending
//! completion is resolved, then the normalized payload is published.

use serde_json::{Value, json};

use crate::bridge::Worker;
use crate::engine::{EngineEvent, MediaEngine, PublisherEvent, SessionEvent, StreamEvent, SubscriberEvent};
use crate::errors::{BridgeError, CompletionKind, ResourceKind};
use crate::events::{BridgeEvent, EventKey};
use crate::model::{ConnectionRecord, SessionTransition, StreamInfo, StreamOrigin, StreamRecord};
use crate::payload;
use crate::registry::CompletionKey;

impl<E: MediaEngine> Worker<E> {
    pub(crate) fn route(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Session { session_id, event } => self.on_session_event(&session_id, event),
            EngineEvent::Publisher { publisher_id, event } => self.on_publisher_event(&publisher_id, event),
            EngineEvent::Subscriber { stream_id, event } => self.on_subscriber_event(&stream_id, event),
            EngineEvent::Stream(StreamEvent::Updated(info)) => self.on_stream_updated(info),
        }
    }

    fn emit(&self, key: EventKey, payload: Value) {
        let event = BridgeEvent::new(key, payload);
        let delivered = self.subscriptions.publish(&event);
        tracing::trace!(event = %event.name, delivered, "event published");
    }

    /// Move the session through its state machine. Illegal moves are logged
    /// and the callback is dropped.
    fn transition(&mut self, session_id: &str, transition: SessionTransition) -> bool {
        let Ok(entry) = self.registry.sessions.get_mut(session_id) else {
            return false;
        };
        match entry.record.status.next(transition) {
            Some(status) => {
                entry.record.status = status;
                true
            }
            None => {
                tracing::warn!(
                    session_id,
                    "ignoring {transition:?} callback in state {:?}",
                    entry.record.status
                );
                false
            }
        }
    }

    fn session_payload(&self, session_id: &str) -> Value {
        match self.registry.sessions.get(session_id) {
            Ok(entry) => {
                let own = entry
                    .record
                    .connection_id
                    .as_deref()
                    .and_then(|id| self.registry.connections.get(id).ok())
                    .map(|c| &c.info);
                payload::session(&entry.record, own)
            }
            Err(_) => json!({ "sessionId": session_id }),
        }
    }

    fn stream_payload(&self, info: &StreamInfo, session_id: &str) -> Value {
        let owner = self
            .registry
            .connections
            .get(&info.connection_id)
            .ok()
            .map(|c| &c.info);
        payload::stream(info, session_id, owner)
    }

    // ── Session callbacks ────────────────────────────────────────────

    fn on_session_event(&mut self, session_id: &str, event: SessionEvent) {
        if !self.registry.sessions.contains(session_id) {
            match event {
                SessionEvent::Disconnected
                | SessionEvent::StreamDestroyed { .. }
                | SessionEvent::ConnectionDestroyed { .. } => {
                    tracing::debug!(session_id, "late teardown callback for unknown session");
                }
                other => {
                    tracing::warn!(session_id, "callback {other:?} for unknown session");
                    self.emit(
                        EventKey::session(session_id, "didFailWithError"),
                        payload::not_found(ResourceKind::Session, session_id),
                    );
                }
            }
            return;
        }

        match event {
            SessionEvent::Connected { connection, capabilities } => {
                if !self.transition(session_id, SessionTransition::Connected) {
                    return;
                }
                let connection_id = connection.connection_id.clone();
                if let Ok(entry) = self.registry.sessions.get_mut(session_id) {
                    entry.record.connection_id = Some(connection_id.clone());
                    entry.record.capabilities = capabilities;
                }
                self.registry.connections.put(
                    &connection_id,
                    ConnectionRecord {
                        info: connection,
                        session_id: session_id.to_string(),
                    },
                );
                self.registry
                    .pending
                    .resolve(&CompletionKey::new(CompletionKind::Connect, session_id), Ok(()));
                self.emit(
                    EventKey::session(session_id, "sessionDidConnect"),
                    self.session_payload(session_id),
                );
                lifecycle!(self, session_id, "session connected");
            }
            SessionEvent::Disconnected => {
                if !self.transition(session_id, SessionTransition::Disconnected) {
                    return;
                }
                let payload = self.session_payload(session_id);
                let requested = self
                    .registry
                    .pending
                    .resolve(&CompletionKey::new(CompletionKind::Disconnect, session_id), Ok(()));
                self.emit(EventKey::session(session_id, "sessionDidDisconnect"), payload);
                lifecycle!(self, session_id, requested, "session disconnected");
                self.purge_session(session_id);
            }
            SessionEvent::Reconnecting => {
                if self.transition(session_id, SessionTransition::Reconnecting) {
                    self.emit(
                        EventKey::session(session_id, "sessionDidBeginReconnecting"),
                        self.session_payload(session_id),
                    );
                    lifecycle!(self, session_id, "session reconnecting");
                }
            }
            SessionEvent::Reconnected => {
                if self.transition(session_id, SessionTransition::Reconnected) {
                    self.emit(
                        EventKey::session(session_id, "sessionDidReconnect"),
                        self.session_payload(session_id),
                    );
                    lifecycle!(self, session_id, "session reconnected");
                }
            }
            SessionEvent::Failed { error } => {
                if !self.transition(session_id, SessionTransition::Failed) {
                    return;
                }
                // Terminal: nothing else will answer a waiting connect or disconnect.
                for kind in [CompletionKind::Connect, CompletionKind::Disconnect] {
                    self.registry.pending.resolve(
                        &CompletionKey::new(kind, session_id),
                        Err(BridgeError::Engine(error.clone())),
                    );
                }
                self.emit(EventKey::session(session_id, "didFailWithError"), payload::error(&error));
                tracing::warn!(session_id, "session failed: {error}");
            }
            SessionEvent::ConnectionCreated(info) => {
                let payload = payload::connection_event(&info, session_id);
                let connection_id = info.connection_id.clone();
                self.registry.connections.put(
                    &connection_id,
                    ConnectionRecord {
                        info,
                        session_id: session_id.to_string(),
                    },
                );
                self.emit(EventKey::session(session_id, "connectionCreated"), payload);
            }
            SessionEvent::ConnectionDestroyed { connection_id } => {
                let Some(record) = self.registry.connections.remove(&connection_id) else {
                    return;
                };
                self.emit(
                    EventKey::session(session_id, "connectionDestroyed"),
                    payload::connection_event(&record.info, session_id),
                );
            }
            SessionEvent::StreamCreated(info) => {
                let payload = self.stream_payload(&info, session_id);
                let stream_id = info.stream_id.clone();
                self.registry.streams.put(
                    &stream_id,
                    StreamRecord {
                        info,
                        session_id: session_id.to_string(),
                        origin: StreamOrigin::Session,
                        publisher_id: None,
                    },
                );
                self.emit(EventKey::session(session_id, "streamCreated"), payload);
                lifecycle!(self, session_id, stream_id, "stream created");
            }
            SessionEvent::StreamDestroyed { stream_id } => {
                let Some(record) = self.registry.streams.remove(&stream_id) else {
                    return;
                };
                // The engine already tore the subscriber down with its stream.
                if self.registry.subscribers.remove(&stream_id).is_some() {
                    lifecycle!(self, stream_id, "subscriber dropped with its stream");
                }
                self.emit(
                    EventKey::session(session_id, "streamDestroyed"),
                    self.stream_payload(&record.info, session_id),
                );
                lifecycle!(self, session_id, stream_id, "stream destroyed");
            }
            SessionEvent::SignalReceived { kind, data, connection_id } => {
                self.emit(
                    EventKey::session(session_id, "signal"),
                    json!({
                        "type": kind,
                        "data": data,
                        "connectionId": connection_id,
                        "sessionId": session_id,
                    }),
                );
            }
            SessionEvent::ArchiveStarted { archive_id, name } => {
                self.emit(
                    EventKey::session(session_id, "archiveStartedWithId"),
                    json!({ "archiveId": archive_id, "name": name, "sessionId": session_id }),
                );
            }
            SessionEvent::ArchiveStopped { archive_id } => {
                self.emit(
                    EventKey::session(session_id, "archiveStoppedWithId"),
                    json!({ "archiveId": archive_id, "name": "", "sessionId": session_id }),
                );
            }
            SessionEvent::MuteForced { active } => {
                self.emit(EventKey::session(session_id, "muteForced"), json!({ "active": active }));
            }
        }
    }

    // ── Publisher callbacks ──────────────────────────────────────────

    fn on_publisher_event(&mut self, publisher_id: &str, event: PublisherEvent) {
        if !self.registry.publishers.contains(publisher_id) {
            match event {
                PublisherEvent::StreamDestroyed { .. } => {
                    tracing::debug!(publisher_id, "late stream teardown for unknown publisher");
                }
                other => {
                    tracing::warn!(publisher_id, "callback {other:?} for unknown publisher");
                    self.emit(
                        EventKey::publisher(publisher_id, "didFailWithError"),
                        payload::not_found(ResourceKind::Publisher, publisher_id),
                    );
                }
            }
            return;
        }

        let key = |event_type: &str| EventKey::publisher(publisher_id, event_type);
        match event {
            PublisherEvent::StreamCreated(info) => self.on_publisher_stream_created(publisher_id, info),
            PublisherEvent::StreamDestroyed { stream_id } => {
                self.on_publisher_stream_destroyed(publisher_id, &stream_id)
            }
            PublisherEvent::Failed { error } => {
                tracing::warn!(publisher_id, "publisher failed: {error}");
                self.emit(key("didFailWithError"), payload::error(&error));
            }
            PublisherEvent::MuteForced => self.emit(key("muteForced"), Value::Null),
            PublisherEvent::VideoDisableWarning => self.emit(key("videoDisableWarning"), Value::Null),
            PublisherEvent::VideoDisableWarningLifted => self.emit(key("videoDisableWarningLifted"), Value::Null),
            PublisherEvent::VideoDisabled { reason } => {
                self.emit(key("videoDisabled"), json!({ "reason": reason }))
            }
            PublisherEvent::VideoEnabled { reason } => self.emit(key("videoEnabled"), json!({ "reason": reason })),
            PublisherEvent::AudioLevelUpdated { audio_level } => {
                self.emit(key("audioLevelUpdated"), json!(audio_level))
            }
            PublisherEvent::AudioNetworkStatsUpdated { stats } => self.emit(key("audioNetworkStatsUpdated"), stats),
            PublisherEvent::VideoNetworkStatsUpdated { stats } => self.emit(key("videoNetworkStatsUpdated"), stats),
            PublisherEvent::RtcStatsReport { stats } => self.emit(key("rtcStatsReport"), stats),
        }
    }

    fn on_publisher_stream_created(&mut self, publisher_id: &str, info: StreamInfo) {
        let Ok(entry) = self.registry.publishers.get_mut(publisher_id) else {
            return;
        };
        let Some(session_id) = entry.record.session_id.clone() else {
            tracing::warn!(publisher_id, "stream created for a publisher that was never published");
            return;
        };
        entry.record.is_publishing = true;
        entry.record.stream_id = Some(info.stream_id.clone());

        let record = StreamRecord {
            info,
            session_id: session_id.clone(),
            origin: StreamOrigin::Publisher,
            publisher_id: Some(publisher_id.to_string()),
        };
        let stream_id = record.id().to_string();
        let payload = payload::publisher_stream(&record.info, &session_id, publisher_id);
        self.registry.publisher_streams.put(&stream_id, record.clone());
        self.registry.streams.put(&stream_id, record);

        self.emit(EventKey::global("publisherStreamCreated"), payload);
        lifecycle!(self, publisher_id, stream_id, "publisher stream created");
    }

    fn on_publisher_stream_destroyed(&mut self, publisher_id: &str, stream_id: &str) {
        let removed = self.registry.publisher_streams.remove(stream_id);
        self.registry.streams.remove(stream_id);

        let session_id = match self.registry.publishers.get_mut(publisher_id) {
            Ok(entry) => {
                let session_id = entry.record.session_id.clone().unwrap_or_default();
                entry.record.detach();
                session_id
            }
            Err(_) => String::new(),
        };

        let destroy = CompletionKey::new(CompletionKind::DestroyPublisher, publisher_id);
        let destroying = self.registry.pending.is_pending(&destroy);
        if destroying {
            self.drop_publisher(publisher_id);
        }

        let payload = match &removed {
            Some(record) => payload::publisher_stream(&record.info, &session_id, publisher_id),
            None => json!({ "streamId": stream_id, "sessionId": session_id, "publisherId": publisher_id }),
        };
        self.emit(EventKey::global("publisherStreamDestroyed"), payload);
        lifecycle!(self, publisher_id, stream_id, destroying, "publisher stream destroyed");
    }

    // ── Subscriber callbacks ─────────────────────────────────────────

    fn on_subscriber_event(&mut self, stream_id: &str, event: SubscriberEvent) {
        if !self.registry.subscribers.contains(stream_id) {
            match event {
                SubscriberEvent::Disconnected => {
                    tracing::debug!(stream_id, "late disconnect for removed subscriber");
                }
                other => {
                    tracing::warn!(stream_id, "callback {other:?} for unknown subscriber");
                    let mut payload = payload::not_found(ResourceKind::Subscriber, stream_id);
                    payload["stream"] = json!({ "streamId": stream_id });
                    self.emit(EventKey::subscriber("didFailWithError"), payload);
                }
            }
            return;
        }

        let stream = self
            .registry
            .any_stream(stream_id)
            .map(|s| self.stream_payload(&s.info, &s.session_id));
        let with_stream = |fields: Value| payload::subscriber(stream.clone(), fields);

        let (event_type, payload) = match event {
            SubscriberEvent::Connected => (
                "subscriberDidConnect",
                stream.clone().unwrap_or(Value::Null),
            ),
            SubscriberEvent::Disconnected => ("subscriberDidDisconnect", with_stream(json!({}))),
            SubscriberEvent::Reconnected => ("subscriberDidReconnect", with_stream(json!({}))),
            SubscriberEvent::Failed { error } => {
                tracing::warn!(stream_id, "subscriber failed: {error}");
                ("didFailWithError", with_stream(json!({ "error": payload::error(&error) })))
            }
            SubscriberEvent::VideoEnabled { reason } => {
                ("subscriberVideoEnabled", with_stream(json!({ "reason": reason })))
            }
            SubscriberEvent::VideoDisabled { reason } => {
                ("subscriberVideoDisabled", with_stream(json!({ "reason": reason })))
            }
            SubscriberEvent::VideoDisableWarning => ("subscriberVideoDisableWarning", with_stream(json!({}))),
            SubscriberEvent::VideoDisableWarningLifted => {
                ("subscriberVideoDisableWarningLifted", with_stream(json!({})))
            }
            SubscriberEvent::VideoDataReceived => ("subscriberVideoDataReceived", with_stream(json!({}))),
            SubscriberEvent::AudioLevelUpdated { audio_level } => {
                ("audioLevelUpdated", with_stream(json!({ "audioLevel": audio_level })))
            }
            SubscriberEvent::CaptionReceived { text, is_final } => (
                "subscriberCaptionReceived",
                with_stream(json!({ "text": text, "isFinal": is_final })),
            ),
            SubscriberEvent::AudioNetworkStatsUpdated { stats } => {
                ("audioNetworkStatsUpdated", with_stream(json!({ "audioStats": stats })))
            }
            SubscriberEvent::VideoNetworkStatsUpdated { stats } => {
                ("videoNetworkStatsUpdated", with_stream(json!({ "videoStats": stats })))
            }
            SubscriberEvent::RtcStatsReport { json_array_of_reports } => (
                "rtcStatsReport",
                with_stream(json!({ "jsonArrayOfReports": json_array_of_reports })),
            ),
        };
        self.emit(EventKey::subscriber(event_type), payload);
    }

    // ── Stream attribute changes ─────────────────────────────────────

    fn on_stream_updated(&mut self, info: StreamInfo) {
        let stream_id = info.stream_id.clone();
        let Some(previous) = self.registry.any_stream(&stream_id).cloned() else {
            tracing::debug!(stream_id, "attribute update for unknown stream");
            return;
        };

        let old = &previous.info;
        let mut changes: Vec<(&str, Value, Value)> = Vec::new();
        if old.has_audio != info.has_audio {
            changes.push(("hasAudio", json!(old.has_audio), json!(info.has_audio)));
        }
        if old.has_video != info.has_video {
            changes.push(("hasVideo", json!(old.has_video), json!(info.has_video)));
        }
        if old.has_captions != info.has_captions {
            changes.push(("hasCaptions", json!(old.has_captions), json!(info.has_captions)));
        }
        if old.video_dimensions != info.video_dimensions {
            changes.push((
                "videoDimensions",
                json!(old.video_dimensions),
                json!(info.video_dimensions),
            ));
        }
        if old.video_type != info.video_type {
            changes.push((
                "videoType",
                json!(old.video_type.as_str()),
                json!(info.video_type.as_str()),
            ));
        }
        if changes.is_empty() {
            return;
        }

        for pool in [&mut self.registry.streams, &mut self.registry.publisher_streams] {
            if let Ok(record) = pool.get_mut(&stream_id) {
                record.info = info.clone();
            }
        }

        let session_id = previous.session_id;
        let stream = self.stream_payload(&info, &session_id);
        for (property, old_value, new_value) in changes {
            self.emit(
                EventKey::session(&session_id, "streamPropertyChanged"),
                payload::stream_property_changed(property, old_value, new_value, stream.clone()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use crate::bridge::BridgeHandle;
    use crate::engine::{EngineEvent, PublisherEvent, SessionEvent, StreamEvent, SubscriberEvent};
    use crate::errors::{BridgeError, EngineError};
    use crate::events::{BridgeEvent, EventKey};
    use crate::model::{ConnectionStatus, VideoDimensions};
    use crate::settings::BridgeSettings;
    use crate::test_support::{MockEngine, MockProbe, capture_events, connected_session, stream_info};

    async fn setup() -> (BridgeHandle, MockProbe, Arc<Mutex<Vec<BridgeEvent>>>) {
        let (engine, probe) = MockEngine::new();
        let bridge = BridgeHandle::spawn(engine, BridgeSettings::default());
        let events = capture_events(&bridge).await;
        (bridge, probe, events)
    }

    fn names(events: &Arc<Mutex<Vec<BridgeEvent>>>) -> Vec<String> {
        events.lock().unwrap().iter().map(|e| e.name.clone()).collect()
    }

    #[tokio::test]
    async fn connect_resolves_once_and_emits_once() {
        let (bridge, probe, events) = setup().await;
        connected_session(&bridge, &probe, "s1").await;

        let connects: Vec<_> = names(&events)
            .into_iter()
            .filter(|n| n == "s1:session:sessionDidConnect")
            .collect();
        assert_eq!(connects.len(), 1);

        let info = bridge.get_session_info("s1").await.unwrap().unwrap();
        assert_eq!(info.connection_status, ConnectionStatus::Connected);
        assert_eq!(info.connection_id.as_deref(), Some("s1-conn"));

        // A duplicate callback is an illegal transition and is dropped.
        probe.emit_session("s1", SessionEvent::Connected {
            connection: crate::model::ConnectionInfo {
                connection_id: "s1-conn".into(),
                data: String::new(),
                creation_time: String::new(),
            },
            capabilities: Default::default(),
        });
        bridge.get_supported_codecs().await.unwrap();
        assert_eq!(
            names(&events).iter().filter(|n| *n == "s1:session:sessionDidConnect").count(),
            1
        );
    }

    #[tokio::test]
    async fn session_failure_rejects_pending_connect() {
        let (bridge, probe, events) = setup().await;
        bridge.init_session("key", "s1", &json!({})).await.unwrap();
        let connecting = bridge.connect("s1", "token");
        let error = EngineError::new("1006", "connect failed");
        probe.emit_session("s1", SessionEvent::Failed { error: error.clone() });

        assert_eq!(connecting.await, Err(BridgeError::Engine(error)));
        assert_eq!(names(&events), vec!["s1:session:didFailWithError".to_string()]);
        let info = bridge.get_session_info("s1").await.unwrap().unwrap();
        assert_eq!(info.connection_status, ConnectionStatus::Failed);
    }

    #[tokio::test]
    async fn session_failure_rejects_pending_disconnect() {
        let (bridge, probe, _events) = setup().await;
        connected_session(&bridge, &probe, "s1").await;
        let disconnecting = bridge.disconnect_session("s1");
        let error = EngineError::new("1500", "connection lost");
        probe.emit_session("s1", SessionEvent::Failed { error: error.clone() });
        probe.emit_session("s1", SessionEvent::Disconnected);

        assert_eq!(disconnecting.await, Err(BridgeError::Engine(error)));
        // The failed session no longer blocks a retry, which clears it out.
        assert_eq!(bridge.disconnect_session("s1").await, Ok(()));
        assert_eq!(bridge.get_session_info("s1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn stream_destruction_drops_its_subscriber() {
        let (bridge, probe, events) = setup().await;
        connected_session(&bridge, &probe, "s1").await;
        probe.emit_session("s1", SessionEvent::StreamCreated(stream_info("st1", "c2")));
        bridge.subscribe_to_stream("st1", "s1", &json!({})).await.unwrap();

        probe.emit_session("s1", SessionEvent::StreamDestroyed { stream_id: "st1".into() });
        assert!(matches!(
            bridge.set_audio_volume("st1", 10.0).await,
            Err(BridgeError::NotFound { .. })
        ));
        assert!(probe.calls_to("apply_subscriber_property").is_empty());
        assert!(names(&events).contains(&"s1:session:streamDestroyed".to_string()));
    }

    #[tokio::test]
    async fn has_video_flip_emits_one_property_change() {
        let (bridge, probe, events) = setup().await;
        connected_session(&bridge, &probe, "s1").await;
        probe.emit_session("s1", SessionEvent::StreamCreated(stream_info("st1", "c2")));

        let mut updated = stream_info("st1", "c2");
        updated.has_video = false;
        probe.emit(EngineEvent::Stream(StreamEvent::Updated(updated.clone())));
        // Same snapshot again: nothing changed.
        probe.emit(EngineEvent::Stream(StreamEvent::Updated(updated)));
        bridge.get_supported_codecs().await.unwrap();

        let captured = events.lock().unwrap();
        let changes: Vec<_> = captured
            .iter()
            .filter(|e| e.name == "s1:session:streamPropertyChanged")
            .collect();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].payload["changedProperty"], "hasVideo");
        assert_eq!(changes[0].payload["oldValue"], true);
        assert_eq!(changes[0].payload["newValue"], false);
        assert_eq!(changes[0].payload["stream"]["streamId"], "st1");
    }

    #[tokio::test]
    async fn dimension_and_type_changes_are_separate_events() {
        let (bridge, probe, events) = setup().await;
        connected_session(&bridge, &probe, "s1").await;
        probe.emit_session("s1", SessionEvent::StreamCreated(stream_info("st1", "c2")));

        let mut updated = stream_info("st1", "c2");
        updated.video_dimensions = VideoDimensions { width: 1280, height: 720 };
        updated.video_type = crate::model::VideoType::Screen;
        probe.emit(EngineEvent::Stream(StreamEvent::Updated(updated)));
        bridge.get_supported_codecs().await.unwrap();

        let captured = events.lock().unwrap();
        let props: Vec<_> = captured
            .iter()
            .filter(|e| e.event_type == "streamPropertyChanged")
            .map(|e| e.payload["changedProperty"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(props, vec!["videoDimensions", "videoType"]);
    }

    #[tokio::test]
    async fn unknown_ids_emit_synthetic_errors_except_teardown() {
        let (bridge, probe, events) = setup().await;
        probe.emit_session("ghost", SessionEvent::Reconnecting);
        probe.emit_session("ghost", SessionEvent::Disconnected);
        probe.emit_session("ghost", SessionEvent::StreamDestroyed { stream_id: "st".into() });
        probe.emit(EngineEvent::Publisher {
            publisher_id: "nobody".into(),
            event: PublisherEvent::MuteForced,
        });
        probe.emit(EngineEvent::Subscriber {
            stream_id: "st9".into(),
            event: SubscriberEvent::VideoDataReceived,
        });
        bridge.get_supported_codecs().await.unwrap();

        assert_eq!(
            names(&events),
            vec![
                "ghost:session:didFailWithError".to_string(),
                "nobody:publisher:didFailWithError".to_string(),
                "subscriber:didFailWithError".to_string(),
            ]
        );
        let captured = events.lock().unwrap();
        assert_eq!(captured[0].payload["code"], "NotFound");
    }

    #[tokio::test]
    async fn engine_initiated_disconnect_purges_scope() {
        let (bridge, probe, events) = setup().await;
        connected_session(&bridge, &probe, "s1").await;
        let scoped = Arc::new(Mutex::new(0usize));
        let counter = scoped.clone();
        bridge
            .subscribe(
                EventKey::session("s1", "streamCreated"),
                Arc::new(move |_: BridgeEvent| *counter.lock().unwrap() += 1),
            )
            .await
            .unwrap();

        probe.emit_session("s1", SessionEvent::Disconnected);
        bridge.get_supported_codecs().await.unwrap();

        assert!(names(&events).contains(&"s1:session:sessionDidDisconnect".to_string()));
        assert_eq!(*scoped.lock().unwrap(), 0);
        assert_eq!(bridge.get_session_info("s1").await.unwrap(), None);
        assert_eq!(
            bridge.unsubscribe(EventKey::session("s1", "streamCreated")).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn subscriber_events_carry_the_stream() {
        let (bridge, probe, events) = setup().await;
        connected_session(&bridge, &probe, "s1").await;
        probe.emit_session("s1", SessionEvent::StreamCreated(stream_info("st1", "c2")));
        bridge.subscribe_to_stream("st1", "s1", &json!({})).await.unwrap();

        probe.emit(EngineEvent::Subscriber {
            stream_id: "st1".into(),
            event: SubscriberEvent::CaptionReceived {
                text: "hello".into(),
                is_final: true,
            },
        });
        bridge.get_supported_codecs().await.unwrap();

        let captured = events.lock().unwrap();
        let caption = captured
            .iter()
            .find(|e| e.name == "subscriber:subscriberCaptionReceived")
            .unwrap();
        assert_eq!(caption.payload["text"], "hello");
        assert_eq!(caption.payload["isFinal"], true);
        assert_eq!(caption.payload["stream"]["streamId"], "st1");
    }

    #[tokio::test]
    async fn signals_and_connections_are_published() {
        let (bridge, probe, events) = setup().await;
        connected_session(&bridge, &probe, "s1").await;
        probe.emit_session(
            "s1",
            SessionEvent::SignalReceived {
                kind: "chat".into(),
                data: "hi".into(),
                connection_id: Some("c7".into()),
            },
        );
        probe.emit_session("s1", SessionEvent::ConnectionDestroyed { connection_id: "unknown".into() });
        bridge.get_supported_codecs().await.unwrap();

        let captured = events.lock().unwrap();
        let signal = captured.iter().find(|e| e.name == "s1:session:signal").unwrap();
        assert_eq!(signal.payload["type"], "chat");
        assert_eq!(signal.payload["connectionId"], "c7");
        assert!(!captured.iter().any(|e| e.event_type == "connectionDestroyed"));
    }
}
