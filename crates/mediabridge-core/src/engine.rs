//! Contract with the native media engine.
//!
//! The bridge drives the engine through [`MediaEngine`] and the engine talks
//! back through an [`EngineEventSink`], which may be called from any thread.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::bridge::Task;
use crate::errors::EngineError;
use crate::model::{
    Capabilities, ConnectionInfo, PublisherProperty, Signal, StreamInfo, SubscriberProperty,
    SupportedCodecs, Transformer, TransformerChain,
};
use crate::sanitizer::{PublisherSettings, SessionOptions, SubscriberSettings};

/// Operations the bridge needs from the engine.
///
/// Every method is called from the bridge worker only, one at a time. A
/// returned `Err` is a synchronous failure; `Ok` on `connect`, `disconnect`
/// and `unpublish` only means "accepted" and the outcome arrives later as an
/// [`EngineEvent`].
pub trait MediaEngine: Send + 'static {
    type Session: Send + 'static;
    type Publisher: Send + 'static;
    type Subscriber: Send + 'static;

    /// Hand the engine its callback sink. Called once before any other method.
    fn bind(&mut self, _sink: EngineEventSink) {}

    fn create_session(
        &mut self,
        api_key: &str,
        session_id: &str,
        options: &SessionOptions,
    ) -> Result<Self::Session, EngineError>;

    fn connect(&mut self, session: &Self::Session, token: &str) -> Result<(), EngineError>;

    fn disconnect(&mut self, session: &Self::Session) -> Result<(), EngineError>;

    fn create_publisher(
        &mut self,
        publisher_id: &str,
        settings: &PublisherSettings,
    ) -> Result<Self::Publisher, EngineError>;

    fn publish(&mut self, session: &Self::Session, publisher: &Self::Publisher) -> Result<(), EngineError>;

    fn unpublish(&mut self, session: &Self::Session, publisher: &Self::Publisher) -> Result<(), EngineError>;

    fn create_subscriber(
        &mut self,
        stream: &StreamInfo,
        settings: &SubscriberSettings,
    ) -> Result<Self::Subscriber, EngineError>;

    fn subscribe(&mut self, session: &Self::Session, subscriber: &Self::Subscriber) -> Result<(), EngineError>;

    fn unsubscribe(&mut self, session: &Self::Session, subscriber: &Self::Subscriber) -> Result<(), EngineError>;

    fn apply_publisher_property(
        &mut self,
        publisher: &Self::Publisher,
        property: &PublisherProperty,
    ) -> Result<(), EngineError>;

    fn apply_subscriber_property(
        &mut self,
        subscriber: &Self::Subscriber,
        property: &SubscriberProperty,
    ) -> Result<(), EngineError>;

    fn set_transformers(
        &mut self,
        publisher: &Self::Publisher,
        chain: TransformerChain,
        transformers: &[Transformer],
    ) -> Result<(), EngineError>;

    fn send_signal(&mut self, session: &Self::Session, signal: &Signal) -> Result<(), EngineError>;

    fn set_encryption_secret(&mut self, session: &Self::Session, secret: &str) -> Result<(), EngineError>;

    fn force_mute_all(&mut self, session: &Self::Session, excluded_stream_ids: &[String]) -> Result<(), EngineError>;

    fn force_mute_stream(&mut self, session: &Self::Session, stream_id: &str) -> Result<(), EngineError>;

    fn disable_force_mute(&mut self, session: &Self::Session) -> Result<(), EngineError>;

    fn force_disconnect(&mut self, session: &Self::Session, connection_id: &str) -> Result<(), EngineError>;

    /// Returns the engine's issue id.
    fn report_issue(&mut self, session: &Self::Session) -> Result<String, EngineError>;

    /// Results arrive as `PublisherEvent::RtcStatsReport`.
    fn request_publisher_stats(&mut self, _publisher: &Self::Publisher) -> Result<(), EngineError> {
        Ok(())
    }

    /// Results arrive as `SubscriberEvent::RtcStatsReport`.
    fn request_subscriber_stats(&mut self, _subscriber: &Self::Subscriber) -> Result<(), EngineError> {
        Ok(())
    }

    fn supported_codecs(&self) -> SupportedCodecs {
        SupportedCodecs::default()
    }
}

/// Callbacks the engine delivers, tagged by the entity they concern.
///
/// Serializable so that foreign engines can post them as JSON, e.g.
/// `{"session":{"sessionId":"s1","event":"reconnecting"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    Session { session_id: String, event: SessionEvent },
    Publisher { publisher_id: String, event: PublisherEvent },
    Subscriber { stream_id: String, event: SubscriberEvent },
    Stream(StreamEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    Connected {
        connection: ConnectionInfo,
        #[serde(default)]
        capabilities: Capabilities,
    },
    Disconnected,
    Reconnecting,
    Reconnected,
    Failed { error: EngineError },
    ConnectionCreated(ConnectionInfo),
    ConnectionDestroyed { connection_id: String },
    StreamCreated(StreamInfo),
    StreamDestroyed { stream_id: String },
    SignalReceived {
        #[serde(rename = "type", default)]
        kind: String,
        #[serde(default)]
        data: String,
        #[serde(default)]
        connection_id: Option<String>,
    },
    ArchiveStarted {
        archive_id: String,
        #[serde(default)]
        name: String,
    },
    ArchiveStopped { archive_id: String },
    MuteForced { active: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PublisherEvent {
    StreamCreated(StreamInfo),
    StreamDestroyed { stream_id: String },
    Failed { error: EngineError },
    MuteForced,
    VideoDisableWarning,
    VideoDisableWarningLifted,
    VideoDisabled { reason: String },
    VideoEnabled { reason: String },
    AudioLevelUpdated { audio_level: f32 },
    AudioNetworkStatsUpdated { stats: Value },
    VideoNetworkStatsUpdated { stats: Value },
    RtcStatsReport { stats: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SubscriberEvent {
    Connected,
    Disconnected,
    Reconnected,
    Failed { error: EngineError },
    VideoEnabled { reason: String },
    VideoDisabled { reason: String },
    VideoDisableWarning,
    VideoDisableWarningLifted,
    VideoDataReceived,
    AudioLevelUpdated { audio_level: f32 },
    CaptionReceived { text: String, is_final: bool },
    AudioNetworkStatsUpdated { stats: Value },
    VideoNetworkStatsUpdated { stats: Value },
    RtcStatsReport { json_array_of_reports: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamEvent {
    /// Fresh attribute snapshot for a known stream.
    Updated(StreamInfo),
}

/// Non-blocking entry point for engine callbacks.
///
/// Cheap to clone and safe to call from engine threads; events are queued
/// behind whatever the worker is doing and handled in order.
#[derive(Clone)]
pub struct EngineEventSink {
    tx: mpsc::UnboundedSender<Task>,
}

impl EngineEventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Task>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the bridge has shut down.
    pub fn emit(&self, event: EngineEvent) -> bool {
        if self.tx.send(Task::Engine(event)).is_err() {
            tracing::debug!("engine event dropped, bridge is gone");
            return false;
        }
        true
    }
}

impl std::fmt::Debug for EngineEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEventSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_event_from_json() {
        let event: EngineEvent = serde_json::from_str(
            r#"{"session":{"sessionId":"s1","event":{"connected":{"connection":{"connectionId":"c1"},"capabilities":{"canPublish":true}}}}}"#,
        )
        .unwrap();
        match event {
            EngineEvent::Session {
                session_id,
                event: SessionEvent::Connected { connection, capabilities },
            } => {
                assert_eq!(session_id, "s1");
                assert_eq!(connection.connection_id, "c1");
                assert!(capabilities.can_publish);
                assert!(!capabilities.can_force_mute);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn unit_variants_are_plain_strings() {
        let event: EngineEvent =
            serde_json::from_str(r#"{"subscriber":{"streamId":"st1","event":"videoDataReceived"}}"#).unwrap();
        assert_eq!(
            event,
            EngineEvent::Subscriber {
                stream_id: "st1".into(),
                event: SubscriberEvent::VideoDataReceived,
            }
        );
    }

    #[test]
    fn signal_uses_type_key() {
        let event: SessionEvent =
            serde_json::from_str(r#"{"signalReceived":{"type":"chat","data":"hi","connectionId":"c2"}}"#).unwrap();
        assert_eq!(
            event,
            SessionEvent::SignalReceived {
                kind: "chat".into(),
                data: "hi".into(),
                connection_id: Some("c2".into()),
            }
        );
    }

    #[test]
    fn sink_reports_closed_bridge() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EngineEventSink::new(tx);
        assert!(sink.emit(EngineEvent::Stream(StreamEvent::Updated(StreamInfo {
            stream_id: "st1".into(),
            connection_id: String::new(),
            name: String::new(),
            has_audio: false,
            has_video: false,
            has_captions: false,
            video_dimensions: Default::default(),
            video_type: Default::default(),
            creation_time: String::new(),
        }))));
        drop(rx);
        assert!(!sink.emit(EngineEvent::Session {
            session_id: "s1".into(),
            event: SessionEvent::Disconnected,
        }));
    }
}
