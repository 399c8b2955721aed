//! Scripted engine and helpers for driving the worker in tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::bridge::BridgeHandle;
use crate::engine::{EngineEvent, EngineEventSink, MediaEngine, SessionEvent};
use crate::errors::EngineError;
use crate::events::BridgeEvent;
use crate::model::{
    ConnectionInfo, PublisherProperty, Signal, StreamInfo, SubscriberProperty, Transformer, TransformerChain,
    VideoDimensions, VideoType,
};
use crate::sanitizer::{PublisherSettings, SessionOptions, SubscriberSettings};

#[derive(Default)]
struct Shared {
    calls: Vec<String>,
    failing: HashSet<String>,
    sink: Option<EngineEventSink>,
}

/// Engine whose handles are plain ids. Every call is recorded as
/// `op:arg:arg`; operations named in `fail_on` return an error.
pub struct MockEngine {
    shared: Arc<Mutex<Shared>>,
}

/// Test-side view of a [`MockEngine`] that has been moved into the bridge.
#[derive(Clone)]
pub struct MockProbe {
    shared: Arc<Mutex<Shared>>,
}

impl MockEngine {
    pub fn new() -> (MockEngine, MockProbe) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (MockEngine { shared: shared.clone() }, MockProbe { shared })
    }

    fn call(&self, op: &str, args: &[&str]) -> Result<(), EngineError> {
        let mut shared = self.shared.lock().unwrap();
        let mut line = op.to_string();
        for arg in args {
            line.push(':');
            line.push_str(arg);
        }
        shared.calls.push(line);
        if shared.failing.contains(op) {
            return Err(EngineError::new("MockFailure", &format!("{op} failed")));
        }
        Ok(())
    }
}

impl MockProbe {
    pub fn calls(&self) -> Vec<String> {
        self.shared.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, op: &str) -> Vec<String> {
        let prefix = format!("{op}:");
        self.calls()
            .into_iter()
            .filter(|c| c == op || c.starts_with(&prefix))
            .collect()
    }

    pub fn fail_on(&self, op: &str) {
        self.shared.lock().unwrap().failing.insert(op.to_string());
    }

    pub fn emit(&self, event: EngineEvent) {
        let sink = self.shared.lock().unwrap().sink.clone();
        if let Some(sink) = sink {
            sink.emit(event);
        }
    }

    pub fn emit_session(&self, session_id: &str, event: SessionEvent) {
        self.emit(EngineEvent::Session {
            session_id: session_id.to_string(),
            event,
        });
    }
}

impl MediaEngine for MockEngine {
    type Session = String;
    type Publisher = String;
    type Subscriber = String;

    fn bind(&mut self, sink: EngineEventSink) {
        self.shared.lock().unwrap().sink = Some(sink);
    }

    fn create_session(&mut self, api_key: &str, session_id: &str, _: &SessionOptions) -> Result<String, EngineError> {
        self.call("create_session", &[api_key, session_id])?;
        Ok(session_id.to_string())
    }

    fn connect(&mut self, session: &String, token: &str) -> Result<(), EngineError> {
        self.call("connect", &[session, token])
    }

    fn disconnect(&mut self, session: &String) -> Result<(), EngineError> {
        self.call("disconnect", &[session])
    }

    fn create_publisher(&mut self, publisher_id: &str, _: &PublisherSettings) -> Result<String, EngineError> {
        self.call("create_publisher", &[publisher_id])?;
        Ok(publisher_id.to_string())
    }

    fn publish(&mut self, session: &String, publisher: &String) -> Result<(), EngineError> {
        self.call("publish", &[session, publisher])
    }

    fn unpublish(&mut self, session: &String, publisher: &String) -> Result<(), EngineError> {
        self.call("unpublish", &[session, publisher])
    }

    fn create_subscriber(&mut self, stream: &StreamInfo, _: &SubscriberSettings) -> Result<String, EngineError> {
        self.call("create_subscriber", &[&stream.stream_id])?;
        Ok(stream.stream_id.clone())
    }

    fn subscribe(&mut self, session: &String, subscriber: &String) -> Result<(), EngineError> {
        self.call("subscribe", &[session, subscriber])
    }

    fn unsubscribe(&mut self, session: &String, subscriber: &String) -> Result<(), EngineError> {
        self.call("unsubscribe", &[session, subscriber])
    }

    fn apply_publisher_property(&mut self, publisher: &String, property: &PublisherProperty) -> Result<(), EngineError> {
        self.call("apply_publisher_property", &[publisher, &format!("{property:?}")])
    }

    fn apply_subscriber_property(
        &mut self,
        subscriber: &String,
        property: &SubscriberProperty,
    ) -> Result<(), EngineError> {
        self.call("apply_subscriber_property", &[subscriber, &format!("{property:?}")])
    }

    fn set_transformers(
        &mut self,
        publisher: &String,
        chain: TransformerChain,
        transformers: &[Transformer],
    ) -> Result<(), EngineError> {
        let names: Vec<&str> = transformers.iter().map(|t| t.name.as_str()).collect();
        self.call(
            "set_transformers",
            &[publisher, &format!("{chain:?}"), &format!("[{}]", names.join(","))],
        )
    }

    fn send_signal(&mut self, session: &String, signal: &Signal) -> Result<(), EngineError> {
        let to = signal.to.clone().unwrap_or_default();
        self.call("send_signal", &[session, &signal.kind, &to])
    }

    fn set_encryption_secret(&mut self, session: &String, secret: &str) -> Result<(), EngineError> {
        self.call("set_encryption_secret", &[session, secret])
    }

    fn force_mute_all(&mut self, session: &String, excluded_stream_ids: &[String]) -> Result<(), EngineError> {
        self.call(
            "force_mute_all",
            &[session, &format!("[{}]", excluded_stream_ids.join(","))],
        )
    }

    fn force_mute_stream(&mut self, session: &String, stream_id: &str) -> Result<(), EngineError> {
        self.call("force_mute_stream", &[session, stream_id])
    }

    fn disable_force_mute(&mut self, session: &String) -> Result<(), EngineError> {
        self.call("disable_force_mute", &[session])
    }

    fn force_disconnect(&mut self, session: &String, connection_id: &str) -> Result<(), EngineError> {
        self.call("force_disconnect", &[session, connection_id])
    }

    fn report_issue(&mut self, session: &String) -> Result<String, EngineError> {
        self.call("report_issue", &[session])?;
        Ok(format!("issue-{session}"))
    }

    fn request_publisher_stats(&mut self, publisher: &String) -> Result<(), EngineError> {
        self.call("request_publisher_stats", &[publisher])
    }

    fn request_subscriber_stats(&mut self, subscriber: &String) -> Result<(), EngineError> {
        self.call("request_subscriber_stats", &[subscriber])
    }
}

/// Register a catch-all listener that records every event in order.
pub async fn capture_events(bridge: &BridgeHandle) -> Arc<Mutex<Vec<BridgeEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    bridge
        .add_listener(Arc::new(move |event: BridgeEvent| sink.lock().unwrap().push(event)))
        .await
        .unwrap();
    events
}

/// Wait until the worker has handled everything queued so far.
pub async fn settle(bridge: &BridgeHandle) {
    bridge.get_supported_codecs().await.unwrap();
}

pub fn stream_info(stream_id: &str, connection_id: &str) -> StreamInfo {
    StreamInfo {
        stream_id: stream_id.to_string(),
        connection_id: connection_id.to_string(),
        name: format!("{stream_id}-name"),
        has_audio: true,
        has_video: true,
        has_captions: false,
        video_dimensions: VideoDimensions { width: 640, height: 480 },
        video_type: VideoType::Camera,
        creation_time: "2024-01-01T00:00:00Z".to_string(),
    }
}

/// Initialise and connect `session_id`; its own connection is `<id>-conn`.
pub async fn connected_session(bridge: &BridgeHandle, probe: &MockProbe, session_id: &str) {
    bridge.init_session("key", session_id, &json!({})).await.unwrap();
    let connecting = bridge.connect(session_id, "token");
    probe.emit_session(
        session_id,
        SessionEvent::Connected {
            connection: ConnectionInfo {
                connection_id: format!("{session_id}-conn"),
                data: String::new(),
                creation_time: String::new(),
            },
            capabilities: Default::default(),
        },
    );
    connecting.await.unwrap();
}

/// Publish `publisher_id` into a connected session and confirm its stream.
pub async fn published(bridge: &BridgeHandle, probe: &MockProbe, session_id: &str, publisher_id: &str, stream_id: &str) {
    bridge.init_publisher(publisher_id, &json!({})).await.unwrap();
    bridge.publish(session_id, publisher_id).await.unwrap();
    probe.emit(EngineEvent::Publisher {
        publisher_id: publisher_id.to_string(),
        event: crate::engine::PublisherEvent::StreamCreated(stream_info(stream_id, &format!("{session_id}-conn"))),
    });
    settle(bridge).await;
}
