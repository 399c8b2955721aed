//! Records owned by the registry and the value types they carry.
//!
//! Records never point at each other; cross references are plain ids that
//! are looked up through the [`Registry`](crate::registry::Registry).

use serde::{Deserialize, Serialize};

use crate::sanitizer::SessionOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
    Failed,
}

/// Lifecycle callbacks that move a session through its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    Connected,
    Reconnecting,
    Reconnected,
    Failed,
    Disconnected,
}

impl ConnectionStatus {
    /// Next status for a callback, or `None` when the callback is not a legal
    /// move from the current status. `Failed` is terminal.
    pub fn next(self, transition: SessionTransition) -> Option<ConnectionStatus> {
        use ConnectionStatus as S;
        use SessionTransition as T;
        match (self, transition) {
            (S::Failed, _) => None,
            (_, T::Failed) => Some(S::Failed),
            (_, T::Disconnected) => Some(S::Disconnected),
            (S::Disconnected | S::Connecting, T::Connected) => Some(S::Connected),
            (S::Connected, T::Reconnecting) => Some(S::Reconnecting),
            (S::Reconnecting, T::Reconnected) => Some(S::Connected),
            _ => None,
        }
    }

    /// Whether the engine can still act on the session (publish, unpublish, signal).
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Reconnecting)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub can_publish: bool,
    #[serde(default)]
    pub can_subscribe: bool,
    #[serde(default)]
    pub can_force_mute: bool,
    #[serde(default)]
    pub can_force_disconnect: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoType {
    #[default]
    Camera,
    Screen,
    Custom,
}

impl VideoType {
    pub fn as_str(self) -> &'static str {
        match self {
            VideoType::Camera => "camera",
            VideoType::Screen => "screen",
            VideoType::Custom => "custom",
        }
    }
}

/// Stream attributes as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub stream_id: String,
    #[serde(default)]
    pub connection_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub has_audio: bool,
    #[serde(default)]
    pub has_video: bool,
    #[serde(default)]
    pub has_captions: bool,
    #[serde(default)]
    pub video_dimensions: VideoDimensions,
    #[serde(default)]
    pub video_type: VideoType,
    #[serde(default)]
    pub creation_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub connection_id: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub creation_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    /// Remote stream announced by the session.
    Session,
    /// The local publisher's own stream.
    Publisher,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub info: StreamInfo,
    pub session_id: String,
    pub origin: StreamOrigin,
    pub publisher_id: Option<String>,
}

impl StreamRecord {
    pub fn id(&self) -> &str {
        &self.info.stream_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub info: ConnectionInfo,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub api_key: String,
    pub status: ConnectionStatus,
    pub capabilities: Capabilities,
    pub connection_id: Option<String>,
    pub options: SessionOptions,
}

impl SessionRecord {
    pub fn new(id: &str, api_key: &str, options: SessionOptions) -> Self {
        Self {
            id: id.to_string(),
            api_key: api_key.to_string(),
            status: ConnectionStatus::Disconnected,
            capabilities: Capabilities::default(),
            connection_id: None,
            options,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CameraPosition {
    #[default]
    Front,
    Back,
}

impl CameraPosition {
    /// Anything other than `"front"` selects the back camera.
    pub fn parse(value: &str) -> Self {
        if value == "front" {
            CameraPosition::Front
        } else {
            CameraPosition::Back
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoContentHint {
    #[default]
    None,
    Motion,
    Detail,
    Text,
}

impl VideoContentHint {
    pub fn parse(value: &str) -> Self {
        match value {
            "motion" => VideoContentHint::Motion,
            "detail" => VideoContentHint::Detail,
            "text" => VideoContentHint::Text,
            _ => VideoContentHint::None,
        }
    }
}

/// One named stage of an audio or video processing chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformer {
    pub name: String,
    pub properties: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformerChain {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublisherProperty {
    PublishAudio(bool),
    PublishVideo(bool),
    PublishCaptions(bool),
    CameraTorch(bool),
    CameraZoomFactor(f32),
    CameraPosition(CameraPosition),
    VideoContentHint(VideoContentHint),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublisherRecord {
    pub id: String,
    pub session_id: Option<String>,
    pub stream_id: Option<String>,
    pub is_publishing: bool,
    pub publish_audio: bool,
    pub publish_video: bool,
    pub publish_captions: bool,
    pub camera_torch: bool,
    pub camera_zoom_factor: Option<f32>,
    pub camera_position: CameraPosition,
    pub video_content_hint: VideoContentHint,
    pub audio_transformers: Vec<Transformer>,
    pub video_transformers: Vec<Transformer>,
}

impl PublisherRecord {
    pub fn apply(&mut self, property: &PublisherProperty) {
        match property {
            PublisherProperty::PublishAudio(v) => self.publish_audio = *v,
            PublisherProperty::PublishVideo(v) => self.publish_video = *v,
            PublisherProperty::PublishCaptions(v) => self.publish_captions = *v,
            PublisherProperty::CameraTorch(v) => self.camera_torch = *v,
            PublisherProperty::CameraZoomFactor(v) => self.camera_zoom_factor = Some(*v),
            PublisherProperty::CameraPosition(v) => self.camera_position = *v,
            PublisherProperty::VideoContentHint(v) => self.video_content_hint = *v,
        }
    }

    pub fn transformers_mut(&mut self, chain: TransformerChain) -> &mut Vec<Transformer> {
        match chain {
            TransformerChain::Audio => &mut self.audio_transformers,
            TransformerChain::Video => &mut self.video_transformers,
        }
    }

    /// Forget the session attachment after unpublish or session teardown.
    pub fn detach(&mut self) {
        self.session_id = None;
        self.stream_id = None;
        self.is_publishing = false;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriberProperty {
    SubscribeToAudio(bool),
    SubscribeToVideo(bool),
    SubscribeToCaptions(bool),
    PreferredResolution(Option<VideoDimensions>),
    PreferredFrameRate(Option<f32>),
    AudioVolume(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberRecord {
    pub stream_id: String,
    pub session_id: String,
    pub subscribe_to_audio: bool,
    pub subscribe_to_video: bool,
    pub subscribe_to_captions: bool,
    pub preferred_resolution: Option<VideoDimensions>,
    pub preferred_frame_rate: Option<f32>,
    pub audio_volume: f64,
}

impl SubscriberRecord {
    pub fn apply(&mut self, property: &SubscriberProperty) {
        match property {
            SubscriberProperty::SubscribeToAudio(v) => self.subscribe_to_audio = *v,
            SubscriberProperty::SubscribeToVideo(v) => self.subscribe_to_video = *v,
            SubscriberProperty::SubscribeToCaptions(v) => self.subscribe_to_captions = *v,
            SubscriberProperty::PreferredResolution(v) => self.preferred_resolution = *v,
            SubscriberProperty::PreferredFrameRate(v) => self.preferred_frame_rate = *v,
            SubscriberProperty::AudioVolume(v) => self.audio_volume = *v,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: String,
    /// Target connection id; empty or absent broadcasts to the session.
    #[serde(default)]
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedCodecs {
    pub video_decoder_codecs: Vec<String>,
    pub video_encoder_codecs: Vec<String>,
}

impl Default for SupportedCodecs {
    fn default() -> Self {
        let codecs = vec!["H.264".to_string(), "VP8".to_string()];
        Self {
            video_decoder_codecs: codecs.clone(),
            video_encoder_codecs: codecs,
        }
    }
}

/// Snapshot returned by `getSessionInfo`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub connection_id: Option<String>,
    pub connection_status: ConnectionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_reconnect_cycle() {
        let s = ConnectionStatus::Disconnected;
        let s = s.next(SessionTransition::Connected).unwrap();
        assert_eq!(s, ConnectionStatus::Connected);
        let s = s.next(SessionTransition::Reconnecting).unwrap();
        assert_eq!(s, ConnectionStatus::Reconnecting);
        let s = s.next(SessionTransition::Reconnected).unwrap();
        assert_eq!(s, ConnectionStatus::Connected);
        assert_eq!(
            s.next(SessionTransition::Disconnected),
            Some(ConnectionStatus::Disconnected)
        );
    }

    #[test]
    fn failed_is_terminal() {
        for from in [
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connected,
            ConnectionStatus::Reconnecting,
        ] {
            assert_eq!(from.next(SessionTransition::Failed), Some(ConnectionStatus::Failed));
        }
        let failed = ConnectionStatus::Failed;
        assert_eq!(failed.next(SessionTransition::Connected), None);
        assert_eq!(failed.next(SessionTransition::Reconnected), None);
    }

    #[test]
    fn reconnected_without_reconnecting_is_ignored() {
        assert_eq!(ConnectionStatus::Connected.next(SessionTransition::Reconnected), None);
        assert_eq!(ConnectionStatus::Disconnected.next(SessionTransition::Reconnecting), None);
    }

    #[test]
    fn camera_position_defaults_to_back() {
        assert_eq!(CameraPosition::parse("front"), CameraPosition::Front);
        assert_eq!(CameraPosition::parse("rear"), CameraPosition::Back);
        assert_eq!(CameraPosition::parse(""), CameraPosition::Back);
    }

    #[test]
    fn signal_deserializes_from_host_shape() {
        let s: Signal = serde_json::from_str(r#"{"type":"chat","data":"hi"}"#).unwrap();
        assert_eq!(s.kind, "chat");
        assert_eq!(s.data, "hi");
        assert!(s.to.is_none());
    }
}
