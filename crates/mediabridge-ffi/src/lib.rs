//! UniFFI bindings for mediabridge-core.
//!
//! Provides a BridgeClient object that owns the bridge worker and a tokio
//! runtime, plus the foreign-implemented NativeMediaEngine trait through
//! which the platform SDK is driven.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use mediabridge_core::{
    BridgeError, BridgeEvent, BridgeHandle, EngineError, EngineEvent, EngineEventSink, EventKey, MediaEngine,
    PlatformFamily, SettingsStore, ValidationError,
    model::{
        Capabilities as CoreCapabilities, ConnectionStatus as CoreConnectionStatus, PublisherProperty,
        SessionInfo as CoreSessionInfo, Signal, StreamInfo, SubscriberProperty, SupportedCodecs as CoreSupportedCodecs,
        Transformer, TransformerChain,
    },
    sanitizer::{PublisherSettings, SessionOptions, SubscriberSettings},
};
use serde_json::{Value, json};

uniffi::setup_scaffolding!();

// ── Namespace functions ──────────────────────────────────────────────

/// Initialize tracing/logging. Call once from the host before using BridgeClient.
/// On Android, stderr goes to logcat for debuggable builds.
#[uniffi::export]
pub fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mediabridge_core=debug,mediabridge_ffi=debug"));
        tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false).init();
    });
}

// ── FFI-safe types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum Platform {
    Ios,
    Android,
}

impl From<Platform> for PlatformFamily {
    fn from(p: Platform) -> Self {
        match p {
            Platform::Ios => PlatformFamily::Ios,
            Platform::Android => PlatformFamily::Android,
        }
    }
}

impl From<PlatformFamily> for Platform {
    fn from(p: PlatformFamily) -> Self {
        match p {
            PlatformFamily::Ios => Platform::Ios,
            PlatformFamily::Android => Platform::Android,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
    Failed,
}

impl From<CoreConnectionStatus> for ConnectionStatus {
    fn from(s: CoreConnectionStatus) -> Self {
        match s {
            CoreConnectionStatus::Disconnected => Self::Disconnected,
            CoreConnectionStatus::Connecting => Self::Connecting,
            CoreConnectionStatus::Connected => Self::Connected,
            CoreConnectionStatus::Reconnecting => Self::Reconnecting,
            CoreConnectionStatus::Disconnecting => Self::Disconnecting,
            CoreConnectionStatus::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct SessionInfo {
    pub session_id: String,
    pub connection_id: Option<String>,
    pub connection_status: ConnectionStatus,
}

impl From<CoreSessionInfo> for SessionInfo {
    fn from(s: CoreSessionInfo) -> Self {
        Self {
            session_id: s.session_id,
            connection_id: s.connection_id,
            connection_status: s.connection_status.into(),
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct Capabilities {
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_force_mute: bool,
    pub can_force_disconnect: bool,
}

impl From<CoreCapabilities> for Capabilities {
    fn from(c: CoreCapabilities) -> Self {
        Self {
            can_publish: c.can_publish,
            can_subscribe: c.can_subscribe,
            can_force_mute: c.can_force_mute,
            can_force_disconnect: c.can_force_disconnect,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct SupportedCodecs {
    pub video_decoder_codecs: Vec<String>,
    pub video_encoder_codecs: Vec<String>,
}

impl From<CoreSupportedCodecs> for SupportedCodecs {
    fn from(c: CoreSupportedCodecs) -> Self {
        Self {
            video_decoder_codecs: c.video_decoder_codecs,
            video_encoder_codecs: c.video_encoder_codecs,
        }
    }
}

/// An option the sanitizer dropped or coerced.
#[derive(Debug, Clone, uniffi::Record)]
pub struct ValidationIssue {
    pub key: String,
    pub message: String,
}

impl From<ValidationError> for ValidationIssue {
    fn from(e: ValidationError) -> Self {
        Self {
            key: e.key,
            message: e.message,
        }
    }
}

fn issues(diagnostics: Vec<ValidationError>) -> Vec<ValidationIssue> {
    diagnostics.into_iter().map(ValidationIssue::from).collect()
}

// ── Error conversion ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum BridgeFfiError {
    #[error("Not found: {msg}")]
    NotFound { msg: String },
    #[error("Engine error {code}: {message}")]
    Engine { code: String, message: String },
    #[error("Already pending: {msg}")]
    AlreadyPending { msg: String },
    #[error("Cancelled: {msg}")]
    Cancelled { msg: String },
    #[error("Bridge shut down")]
    ShutDown,
    #[error("Invalid JSON: {msg}")]
    InvalidJson { msg: String },
    #[error("Internal error: {msg}")]
    Internal { msg: String },
}

impl From<BridgeError> for BridgeFfiError {
    fn from(e: BridgeError) -> Self {
        tracing::error!("BridgeError: {e}");
        match e {
            BridgeError::NotFound { .. } => Self::NotFound { msg: e.to_string() },
            BridgeError::Engine(EngineError { code, message }) => Self::Engine { code, message },
            BridgeError::AlreadyPending { .. } => Self::AlreadyPending { msg: e.to_string() },
            BridgeError::Cancelled => Self::Cancelled { msg: e.to_string() },
            BridgeError::ShutDown => Self::ShutDown,
        }
    }
}

fn parse_json(input: &str) -> Result<Value, BridgeFfiError> {
    if input.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(input).map_err(|e| BridgeFfiError::InvalidJson { msg: e.to_string() })
}

// ── Foreign engine ────────────────────────────────────────────────────

/// Error a native engine reports back across the boundary.
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum NativeEngineError {
    #[error("{code}: {message}")]
    Failed { code: String, message: String },
    #[error("callback failed: {message}")]
    Unexpected { message: String },
}

impl From<uniffi::UnexpectedUniFFICallbackError> for NativeEngineError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::Unexpected { message: e.reason }
    }
}

impl From<NativeEngineError> for EngineError {
    fn from(e: NativeEngineError) -> Self {
        match e {
            NativeEngineError::Failed { code, message } => EngineError::new(code, message),
            NativeEngineError::Unexpected { message } => EngineError::new("UnexpectedCallbackError", message),
        }
    }
}

/// The platform media SDK, implemented on the host side.
///
/// Entities are addressed by id: sessions by session id, publishers by
/// publisher id and subscribers by the stream id they render. Options are
/// passed as sanitized JSON. Outcomes of `connect`, `disconnect` and
/// `unpublish` come back through [`BridgeClient::post_engine_event`].
#[uniffi::export(with_foreign)]
pub trait NativeMediaEngine: Send + Sync {
    fn create_session(&self, api_key: String, session_id: String, options_json: String) -> Result<(), NativeEngineError>;
    fn connect(&self, session_id: String, token: String) -> Result<(), NativeEngineError>;
    fn disconnect(&self, session_id: String) -> Result<(), NativeEngineError>;

    fn create_publisher(&self, publisher_id: String, settings_json: String) -> Result<(), NativeEngineError>;
    fn publish(&self, session_id: String, publisher_id: String) -> Result<(), NativeEngineError>;
    fn unpublish(&self, session_id: String, publisher_id: String) -> Result<(), NativeEngineError>;
    fn set_publisher_property(&self, publisher_id: String, name: String, value_json: String)
    -> Result<(), NativeEngineError>;
    fn set_transformers(&self, publisher_id: String, video: bool, transformers_json: String)
    -> Result<(), NativeEngineError>;

    fn create_subscriber(&self, stream_id: String, settings_json: String) -> Result<(), NativeEngineError>;
    fn subscribe(&self, session_id: String, stream_id: String) -> Result<(), NativeEngineError>;
    fn unsubscribe(&self, session_id: String, stream_id: String) -> Result<(), NativeEngineError>;
    fn set_subscriber_property(&self, stream_id: String, name: String, value_json: String)
    -> Result<(), NativeEngineError>;

    fn send_signal(&self, session_id: String, kind: String, data: String, to: Option<String>)
    -> Result<(), NativeEngineError>;
    fn set_encryption_secret(&self, session_id: String, secret: String) -> Result<(), NativeEngineError>;
    fn force_mute_all(&self, session_id: String, excluded_stream_ids: Vec<String>) -> Result<(), NativeEngineError>;
    fn force_mute_stream(&self, session_id: String, stream_id: String) -> Result<(), NativeEngineError>;
    fn disable_force_mute(&self, session_id: String) -> Result<(), NativeEngineError>;
    fn force_disconnect(&self, session_id: String, connection_id: String) -> Result<(), NativeEngineError>;
    fn report_issue(&self, session_id: String) -> Result<String, NativeEngineError>;

    fn request_publisher_stats(&self, publisher_id: String) -> Result<(), NativeEngineError>;
    fn request_subscriber_stats(&self, stream_id: String) -> Result<(), NativeEngineError>;
}

fn publisher_property(property: &PublisherProperty) -> (&'static str, Value) {
    match property {
        PublisherProperty::PublishAudio(v) => ("publishAudio", json!(v)),
        PublisherProperty::PublishVideo(v) => ("publishVideo", json!(v)),
        PublisherProperty::PublishCaptions(v) => ("publishCaptions", json!(v)),
        PublisherProperty::CameraTorch(v) => ("cameraTorch", json!(v)),
        PublisherProperty::CameraZoomFactor(v) => ("cameraZoomFactor", json!(v)),
        PublisherProperty::CameraPosition(v) => ("cameraPosition", json!(v)),
        PublisherProperty::VideoContentHint(v) => ("videoContentHint", json!(v)),
    }
}

fn subscriber_property(property: &SubscriberProperty) -> (&'static str, Value) {
    match property {
        SubscriberProperty::SubscribeToAudio(v) => ("subscribeToAudio", json!(v)),
        SubscriberProperty::SubscribeToVideo(v) => ("subscribeToVideo", json!(v)),
        SubscriberProperty::SubscribeToCaptions(v) => ("subscribeToCaptions", json!(v)),
        SubscriberProperty::PreferredResolution(v) => ("preferredResolution", json!(v)),
        SubscriberProperty::PreferredFrameRate(v) => ("preferredFrameRate", json!(v)),
        SubscriberProperty::AudioVolume(v) => ("audioVolume", json!(v)),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, EngineError> {
    serde_json::to_string(value).map_err(|e| EngineError::new("SerializationError", e.to_string()))
}

/// Adapts a foreign [`NativeMediaEngine`] to the core engine trait.
/// Handles are the ids the foreign side knows the entities by.
struct ForeignEngine {
    native: Arc<dyn NativeMediaEngine>,
}

impl MediaEngine for ForeignEngine {
    type Session = String;
    type Publisher = String;
    type Subscriber = String;

    fn create_session(&mut self, api_key: &str, session_id: &str, options: &SessionOptions) -> Result<String, EngineError> {
        self.native
            .create_session(api_key.to_string(), session_id.to_string(), to_json(options)?)?;
        Ok(session_id.to_string())
    }

    fn connect(&mut self, session: &String, token: &str) -> Result<(), EngineError> {
        Ok(self.native.connect(session.clone(), token.to_string())?)
    }

    fn disconnect(&mut self, session: &String) -> Result<(), EngineError> {
        Ok(self.native.disconnect(session.clone())?)
    }

    fn create_publisher(&mut self, publisher_id: &str, settings: &PublisherSettings) -> Result<String, EngineError> {
        self.native
            .create_publisher(publisher_id.to_string(), to_json(settings)?)?;
        Ok(publisher_id.to_string())
    }

    fn publish(&mut self, session: &String, publisher: &String) -> Result<(), EngineError> {
        Ok(self.native.publish(session.clone(), publisher.clone())?)
    }

    fn unpublish(&mut self, session: &String, publisher: &String) -> Result<(), EngineError> {
        Ok(self.native.unpublish(session.clone(), publisher.clone())?)
    }

    fn create_subscriber(&mut self, stream: &StreamInfo, settings: &SubscriberSettings) -> Result<String, EngineError> {
        self.native
            .create_subscriber(stream.stream_id.clone(), to_json(settings)?)?;
        Ok(stream.stream_id.clone())
    }

    fn subscribe(&mut self, session: &String, subscriber: &String) -> Result<(), EngineError> {
        Ok(self.native.subscribe(session.clone(), subscriber.clone())?)
    }

    fn unsubscribe(&mut self, session: &String, subscriber: &String) -> Result<(), EngineError> {
        Ok(self.native.unsubscribe(session.clone(), subscriber.clone())?)
    }

    fn apply_publisher_property(&mut self, publisher: &String, property: &PublisherProperty) -> Result<(), EngineError> {
        let (name, value) = publisher_property(property);
        Ok(self
            .native
            .set_publisher_property(publisher.clone(), name.to_string(), value.to_string())?)
    }

    fn apply_subscriber_property(
        &mut self,
        subscriber: &String,
        property: &SubscriberProperty,
    ) -> Result<(), EngineError> {
        let (name, value) = subscriber_property(property);
        Ok(self
            .native
            .set_subscriber_property(subscriber.clone(), name.to_string(), value.to_string())?)
    }

    fn set_transformers(
        &mut self,
        publisher: &String,
        chain: TransformerChain,
        transformers: &[Transformer],
    ) -> Result<(), EngineError> {
        let video = matches!(chain, TransformerChain::Video);
        Ok(self
            .native
            .set_transformers(publisher.clone(), video, to_json(&transformers)?)?)
    }

    fn send_signal(&mut self, session: &String, signal: &Signal) -> Result<(), EngineError> {
        Ok(self.native.send_signal(
            session.clone(),
            signal.kind.clone(),
            signal.data.clone(),
            signal.to.clone().filter(|to| !to.is_empty()),
        )?)
    }

    fn set_encryption_secret(&mut self, session: &String, secret: &str) -> Result<(), EngineError> {
        Ok(self.native.set_encryption_secret(session.clone(), secret.to_string())?)
    }

    fn force_mute_all(&mut self, session: &String, excluded_stream_ids: &[String]) -> Result<(), EngineError> {
        Ok(self.native.force_mute_all(session.clone(), excluded_stream_ids.to_vec())?)
    }

    fn force_mute_stream(&mut self, session: &String, stream_id: &str) -> Result<(), EngineError> {
        Ok(self.native.force_mute_stream(session.clone(), stream_id.to_string())?)
    }

    fn disable_force_mute(&mut self, session: &String) -> Result<(), EngineError> {
        Ok(self.native.disable_force_mute(session.clone())?)
    }

    fn force_disconnect(&mut self, session: &String, connection_id: &str) -> Result<(), EngineError> {
        Ok(self.native.force_disconnect(session.clone(), connection_id.to_string())?)
    }

    fn report_issue(&mut self, session: &String) -> Result<String, EngineError> {
        Ok(self.native.report_issue(session.clone())?)
    }

    fn request_publisher_stats(&mut self, publisher: &String) -> Result<(), EngineError> {
        Ok(self.native.request_publisher_stats(publisher.clone())?)
    }

    fn request_subscriber_stats(&mut self, subscriber: &String) -> Result<(), EngineError> {
        Ok(self.native.request_subscriber_stats(subscriber.clone())?)
    }
}

// ── Callback interface ────────────────────────────────────────────────

/// Receives bridge events as `(name, payload JSON)`. Called on the bridge
/// worker thread; implementations must not call back into the client
/// synchronously.
#[uniffi::export(callback_interface)]
pub trait BridgeEventCallback: Send + Sync {
    fn on_event(&self, name: String, payload_json: String);
}

// ── Bridge listener: FFI callback → core listener ─────────────────────

struct CallbackListener {
    ffi_listener: Box<dyn BridgeEventCallback>,
}

impl mediabridge_core::BridgeEventListener for CallbackListener {
    fn on_event(&self, event: BridgeEvent) {
        self.ffi_listener.on_event(event.name, event.payload.to_string());
    }
}

// ── BridgeClient: main FFI object ─────────────────────────────────────

#[derive(uniffi::Object)]
pub struct BridgeClient {
    bridge: BridgeHandle,
    sink: EngineEventSink,
    settings: SettingsStore,
    rt: tokio::runtime::Runtime,
}

impl BridgeClient {
    /// Run one bridge request to completion on the client's runtime.
    /// Panics are caught here so they never unwind across the FFI boundary.
    fn run<T>(&self, op: &str, fut: impl Future<Output = Result<T, BridgeError>>) -> Result<T, BridgeFfiError> {
        match catch_unwind(AssertUnwindSafe(|| self.rt.block_on(fut))) {
            Ok(result) => result.map_err(BridgeFfiError::from),
            Err(panic_info) => {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!(op, "panic caught at the FFI boundary: {msg}");
                Err(BridgeFfiError::Internal {
                    msg: format!("panic in {op}: {msg}"),
                })
            }
        }
    }
}

#[uniffi::export]
impl BridgeClient {
    #[uniffi::constructor]
    pub fn new(data_dir: String, engine: Arc<dyn NativeMediaEngine>) -> Result<Arc<Self>, BridgeFfiError> {
        let rt = tokio::runtime::Runtime::new().map_err(|e| BridgeFfiError::Internal {
            msg: format!("failed to create tokio runtime: {e}"),
        })?;
        let settings = SettingsStore::new(&data_dir);
        let bridge = {
            let _guard = rt.enter();
            BridgeHandle::spawn(ForeignEngine { native: engine }, settings.get())
        };
        let sink = bridge.event_sink();
        tracing::info!(data_dir, "bridge client created");
        Ok(Arc::new(Self {
            bridge,
            sink,
            settings,
            rt,
        }))
    }

    /// Entry point for engine callbacks, as serialized [`EngineEvent`] JSON.
    /// Never blocks.
    pub fn post_engine_event(&self, event_json: String) -> Result<(), BridgeFfiError> {
        let event: EngineEvent =
            serde_json::from_str(&event_json).map_err(|e| BridgeFfiError::InvalidJson { msg: e.to_string() })?;
        if self.sink.emit(event) {
            Ok(())
        } else {
            Err(BridgeFfiError::ShutDown)
        }
    }

    // ── Sessions ─────────────────────────────────────────────────────

    pub fn init_session(
        &self,
        api_key: String,
        session_id: String,
        options_json: String,
    ) -> Result<Vec<ValidationIssue>, BridgeFfiError> {
        let options = parse_json(&options_json)?;
        self.run("init_session", self.bridge.init_session(&api_key, &session_id, &options).into_future())
            .map(issues)
    }

    pub fn connect(&self, session_id: String, token: String) -> Result<(), BridgeFfiError> {
        self.run("connect", self.bridge.connect(&session_id, &token).into_future())
    }

    pub fn disconnect_session(&self, session_id: String) -> Result<(), BridgeFfiError> {
        self.run("disconnect_session", self.bridge.disconnect_session(&session_id).into_future())
    }

    /// Unmount path: best-effort engine teardown and a full scope purge.
    pub fn teardown_session(&self, session_id: String) -> Result<(), BridgeFfiError> {
        self.run("teardown_session", self.bridge.teardown_session(&session_id).into_future())
    }

    pub fn send_signal(
        &self,
        session_id: String,
        kind: String,
        data: String,
        to: Option<String>,
    ) -> Result<(), BridgeFfiError> {
        let signal = Signal { kind, data, to };
        self.run("send_signal", self.bridge.send_signal(&session_id, signal).into_future())
    }

    pub fn set_encryption_secret(&self, session_id: String, secret: String) -> Result<(), BridgeFfiError> {
        self.run(
            "set_encryption_secret",
            self.bridge.set_encryption_secret(&session_id, &secret).into_future(),
        )
    }

    pub fn force_mute_all(&self, session_id: String, excluded_stream_ids: Vec<String>) -> Result<(), BridgeFfiError> {
        self.run(
            "force_mute_all",
            self.bridge.force_mute_all(&session_id, excluded_stream_ids).into_future(),
        )
    }

    pub fn force_mute_stream(&self, session_id: String, stream_id: String) -> Result<(), BridgeFfiError> {
        self.run(
            "force_mute_stream",
            self.bridge.force_mute_stream(&session_id, &stream_id).into_future(),
        )
    }

    pub fn disable_force_mute(&self, session_id: String) -> Result<(), BridgeFfiError> {
        self.run("disable_force_mute", self.bridge.disable_force_mute(&session_id).into_future())
    }

    pub fn force_disconnect(&self, session_id: String, connection_id: String) -> Result<(), BridgeFfiError> {
        self.run(
            "force_disconnect",
            self.bridge.force_disconnect(&session_id, &connection_id).into_future(),
        )
    }

    pub fn get_session_info(&self, session_id: String) -> Result<Option<SessionInfo>, BridgeFfiError> {
        self.run("get_session_info", self.bridge.get_session_info(&session_id).into_future())
            .map(|info| info.map(SessionInfo::from))
    }

    pub fn get_session_capabilities(&self, session_id: String) -> Result<Capabilities, BridgeFfiError> {
        self.run(
            "get_session_capabilities",
            self.bridge.get_session_capabilities(&session_id).into_future(),
        )
        .map(Capabilities::from)
    }

    pub fn report_issue(&self, session_id: String) -> Result<String, BridgeFfiError> {
        self.run("report_issue", self.bridge.report_issue(&session_id).into_future())
    }

    pub fn get_supported_codecs(&self) -> Result<SupportedCodecs, BridgeFfiError> {
        self.run("get_supported_codecs", self.bridge.get_supported_codecs().into_future())
            .map(SupportedCodecs::from)
    }

    // ── Publishers ───────────────────────────────────────────────────

    pub fn init_publisher(
        &self,
        publisher_id: String,
        properties_json: String,
    ) -> Result<Vec<ValidationIssue>, BridgeFfiError> {
        let properties = parse_json(&properties_json)?;
        self.run(
            "init_publisher",
            self.bridge.init_publisher(&publisher_id, &properties).into_future(),
        )
        .map(issues)
    }

    pub fn publish(&self, session_id: String, publisher_id: String) -> Result<(), BridgeFfiError> {
        self.run("publish", self.bridge.publish(&session_id, &publisher_id).into_future())
    }

    pub fn unpublish(&self, publisher_id: String) -> Result<(), BridgeFfiError> {
        self.run("unpublish", self.bridge.unpublish(&publisher_id).into_future())
    }

    pub fn destroy_publisher(&self, publisher_id: String) -> Result<(), BridgeFfiError> {
        self.run("destroy_publisher", self.bridge.destroy_publisher(&publisher_id).into_future())
    }

    pub fn publish_audio(&self, publisher_id: String, enabled: bool) -> Result<(), BridgeFfiError> {
        self.run("publish_audio", self.bridge.publish_audio(&publisher_id, enabled).into_future())
    }

    pub fn publish_video(&self, publisher_id: String, enabled: bool) -> Result<(), BridgeFfiError> {
        self.run("publish_video", self.bridge.publish_video(&publisher_id, enabled).into_future())
    }

    pub fn publish_captions(&self, publisher_id: String, enabled: bool) -> Result<(), BridgeFfiError> {
        self.run(
            "publish_captions",
            self.bridge.publish_captions(&publisher_id, enabled).into_future(),
        )
    }

    pub fn camera_torch(&self, publisher_id: String, enabled: bool) -> Result<(), BridgeFfiError> {
        self.run("camera_torch", self.bridge.camera_torch(&publisher_id, enabled).into_future())
    }

    pub fn camera_zoom_factor(&self, publisher_id: String, factor: f32) -> Result<(), BridgeFfiError> {
        self.run(
            "camera_zoom_factor",
            self.bridge.camera_zoom_factor(&publisher_id, factor).into_future(),
        )
    }

    pub fn change_camera_position(&self, publisher_id: String, position: String) -> Result<(), BridgeFfiError> {
        self.run(
            "change_camera_position",
            self.bridge.change_camera_position(&publisher_id, &position).into_future(),
        )
    }

    pub fn change_video_content_hint(&self, publisher_id: String, hint: String) -> Result<(), BridgeFfiError> {
        self.run(
            "change_video_content_hint",
            self.bridge.change_video_content_hint(&publisher_id, &hint).into_future(),
        )
    }

    pub fn set_audio_transformers(
        &self,
        publisher_id: String,
        transformers_json: String,
    ) -> Result<Vec<ValidationIssue>, BridgeFfiError> {
        let transformers = parse_json(&transformers_json)?;
        self.run(
            "set_audio_transformers",
            self.bridge.set_audio_transformers(&publisher_id, &transformers).into_future(),
        )
        .map(issues)
    }

    pub fn set_video_transformers(
        &self,
        publisher_id: String,
        transformers_json: String,
    ) -> Result<Vec<ValidationIssue>, BridgeFfiError> {
        let transformers = parse_json(&transformers_json)?;
        self.run(
            "set_video_transformers",
            self.bridge.set_video_transformers(&publisher_id, &transformers).into_future(),
        )
        .map(issues)
    }

    pub fn get_publisher_rtc_stats_report(&self, publisher_id: String) -> Result<(), BridgeFfiError> {
        self.run(
            "get_publisher_rtc_stats_report",
            self.bridge.get_publisher_rtc_stats_report(&publisher_id).into_future(),
        )
    }

    // ── Subscribers ──────────────────────────────────────────────────

    pub fn subscribe_to_stream(
        &self,
        stream_id: String,
        session_id: String,
        properties_json: String,
    ) -> Result<String, BridgeFfiError> {
        let properties = parse_json(&properties_json)?;
        self.run(
            "subscribe_to_stream",
            self.bridge
                .subscribe_to_stream(&stream_id, &session_id, &properties)
                .into_future(),
        )
    }

    pub fn remove_subscriber(&self, stream_id: String) -> Result<(), BridgeFfiError> {
        self.run("remove_subscriber", self.bridge.remove_subscriber(&stream_id).into_future())
    }

    pub fn subscribe_to_audio(&self, stream_id: String, enabled: bool) -> Result<(), BridgeFfiError> {
        self.run(
            "subscribe_to_audio",
            self.bridge.subscribe_to_audio(&stream_id, enabled).into_future(),
        )
    }

    pub fn subscribe_to_video(&self, stream_id: String, enabled: bool) -> Result<(), BridgeFfiError> {
        self.run(
            "subscribe_to_video",
            self.bridge.subscribe_to_video(&stream_id, enabled).into_future(),
        )
    }

    pub fn subscribe_to_captions(&self, stream_id: String, enabled: bool) -> Result<(), BridgeFfiError> {
        self.run(
            "subscribe_to_captions",
            self.bridge.subscribe_to_captions(&stream_id, enabled).into_future(),
        )
    }

    /// Accepts `{"width":w,"height":h}` or `"WxH"`; anything else clears it.
    pub fn set_preferred_resolution(&self, stream_id: String, resolution_json: String) -> Result<(), BridgeFfiError> {
        let resolution = parse_json(&resolution_json)?;
        self.run(
            "set_preferred_resolution",
            self.bridge.set_preferred_resolution(&stream_id, &resolution).into_future(),
        )
    }

    pub fn set_preferred_frame_rate(&self, stream_id: String, frame_rate_json: String) -> Result<(), BridgeFfiError> {
        let frame_rate = parse_json(&frame_rate_json)?;
        self.run(
            "set_preferred_frame_rate",
            self.bridge.set_preferred_frame_rate(&stream_id, &frame_rate).into_future(),
        )
    }

    pub fn set_audio_volume(&self, stream_id: String, volume: f64) -> Result<(), BridgeFfiError> {
        self.run("set_audio_volume", self.bridge.set_audio_volume(&stream_id, volume).into_future())
    }

    pub fn get_subscriber_rtc_stats_report(&self, stream_id: String) -> Result<(), BridgeFfiError> {
        self.run(
            "get_subscriber_rtc_stats_report",
            self.bridge.get_subscriber_rtc_stats_report(&stream_id).into_future(),
        )
    }

    // ── Events ───────────────────────────────────────────────────────

    pub fn add_listener(&self, listener: Box<dyn BridgeEventCallback>) -> Result<(), BridgeFfiError> {
        let bridge = Arc::new(CallbackListener { ffi_listener: listener });
        self.run("add_listener", self.bridge.add_listener(bridge).into_future())
    }

    /// `event_name` is a fully qualified name such as `s1:session:signal`.
    pub fn subscribe(&self, event_name: String, listener: Box<dyn BridgeEventCallback>) -> Result<(), BridgeFfiError> {
        let bridge = Arc::new(CallbackListener { ffi_listener: listener });
        self.run(
            "subscribe",
            self.bridge.subscribe(EventKey::parse(&event_name), bridge).into_future(),
        )
    }

    pub fn unsubscribe(&self, event_name: String) -> Result<u32, BridgeFfiError> {
        self.run("unsubscribe", self.bridge.unsubscribe(EventKey::parse(&event_name)).into_future())
            .map(|removed| removed as u32)
    }

    /// Host event sink for names enabled with [`Self::set_native_events`].
    pub fn set_event_sink(&self, sink: Box<dyn BridgeEventCallback>) -> Result<(), BridgeFfiError> {
        let bridge: Arc<dyn mediabridge_core::BridgeEventListener> = Arc::new(CallbackListener { ffi_listener: sink });
        self.run("set_event_sink", self.bridge.set_host_sink(Some(bridge)).into_future())
    }

    pub fn clear_event_sink(&self) -> Result<(), BridgeFfiError> {
        self.run("clear_event_sink", self.bridge.set_host_sink(None).into_future())
    }

    pub fn set_native_events(&self, names: Vec<String>) -> Result<(), BridgeFfiError> {
        self.run("set_native_events", self.bridge.set_native_events(names).into_future())
    }

    pub fn remove_native_events(&self, names: Vec<String>) -> Result<(), BridgeFfiError> {
        self.run("remove_native_events", self.bridge.remove_native_events(names).into_future())
    }

    // ── Settings ─────────────────────────────────────────────────────

    /// Persisted; lifecycle logging switches level immediately.
    pub fn enable_logs(&self, enabled: bool) -> Result<(), BridgeFfiError> {
        self.settings.set_logs_enabled(enabled);
        self.run("enable_logs", self.bridge.enable_logs(enabled).into_future())
    }

    pub fn platform(&self) -> Platform {
        self.settings.get().platform.into()
    }

    /// Persisted; applies to clients created afterwards.
    pub fn set_platform(&self, platform: Platform) {
        self.settings.set_platform(platform.into());
    }

    /// `None` waits for the engine indefinitely. Applies to clients created
    /// afterwards.
    pub fn set_publisher_destroy_timeout_ms(&self, timeout_ms: Option<u64>) {
        self.settings.set_publisher_destroy_timeout_ms(timeout_ms);
    }

    pub fn shutdown(&self) {
        self.rt.block_on(self.bridge.shutdown());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEngine {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingEngine {
        fn record(&self, line: String) -> Result<(), NativeEngineError> {
            self.calls.lock().unwrap().push(line);
            Ok(())
        }
    }

    impl NativeMediaEngine for RecordingEngine {
        fn create_session(&self, _: String, session_id: String, _: String) -> Result<(), NativeEngineError> {
            self.record(format!("create_session:{session_id}"))
        }
        fn connect(&self, session_id: String, _: String) -> Result<(), NativeEngineError> {
            self.record(format!("connect:{session_id}"))
        }
        fn disconnect(&self, session_id: String) -> Result<(), NativeEngineError> {
            self.record(format!("disconnect:{session_id}"))
        }
        fn create_publisher(&self, publisher_id: String, settings_json: String) -> Result<(), NativeEngineError> {
            self.record(format!("create_publisher:{publisher_id}:{settings_json}"))
        }
        fn publish(&self, _: String, _: String) -> Result<(), NativeEngineError> {
            Ok(())
        }
        fn unpublish(&self, _: String, _: String) -> Result<(), NativeEngineError> {
            Ok(())
        }
        fn set_publisher_property(&self, publisher_id: String, name: String, value_json: String) -> Result<(), NativeEngineError> {
            self.record(format!("set_publisher_property:{publisher_id}:{name}={value_json}"))
        }
        fn set_transformers(&self, _: String, _: bool, _: String) -> Result<(), NativeEngineError> {
            Ok(())
        }
        fn create_subscriber(&self, _: String, _: String) -> Result<(), NativeEngineError> {
            Ok(())
        }
        fn subscribe(&self, _: String, _: String) -> Result<(), NativeEngineError> {
            Ok(())
        }
        fn unsubscribe(&self, _: String, _: String) -> Result<(), NativeEngineError> {
            Ok(())
        }
        fn set_subscriber_property(&self, _: String, _: String, _: String) -> Result<(), NativeEngineError> {
            Ok(())
        }
        fn send_signal(&self, _: String, _: String, _: String, _: Option<String>) -> Result<(), NativeEngineError> {
            Ok(())
        }
        fn set_encryption_secret(&self, _: String, _: String) -> Result<(), NativeEngineError> {
            Err(NativeEngineError::Failed {
                code: "1500".into(),
                message: "bad secret".into(),
            })
        }
        fn force_mute_all(&self, _: String, _: Vec<String>) -> Result<(), NativeEngineError> {
            Ok(())
        }
        fn force_mute_stream(&self, _: String, _: String) -> Result<(), NativeEngineError> {
            Ok(())
        }
        fn disable_force_mute(&self, _: String) -> Result<(), NativeEngineError> {
            Ok(())
        }
        fn force_disconnect(&self, _: String, _: String) -> Result<(), NativeEngineError> {
            Ok(())
        }
        fn report_issue(&self, session_id: String) -> Result<String, NativeEngineError> {
            Ok(format!("issue-{session_id}"))
        }
        fn request_publisher_stats(&self, _: String) -> Result<(), NativeEngineError> {
            Ok(())
        }
        fn request_subscriber_stats(&self, _: String) -> Result<(), NativeEngineError> {
            Ok(())
        }
    }

    struct Collect(Arc<Mutex<Vec<(String, String)>>>);

    impl BridgeEventCallback for Collect {
        fn on_event(&self, name: String, payload_json: String) {
            self.0.lock().unwrap().push((name, payload_json));
        }
    }

    fn client() -> (Arc<BridgeClient>, Arc<RecordingEngine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let client = BridgeClient::new(dir.path().to_str().unwrap().to_string(), engine.clone()).unwrap();
        (client, engine, dir)
    }

    #[test]
    fn test_connect_round_trip_through_posted_events() {
        let (client, engine, _dir) = client();
        let events = Arc::new(Mutex::new(Vec::new()));
        client.add_listener(Box::new(Collect(events.clone()))).unwrap();

        let diagnostics = client
            .init_session("key".into(), "s1".into(), r#"{"foo":1}"#.into())
            .unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].key, "foo");

        // Post the engine's answer before asking; it queues behind the connect.
        let connecting = {
            let client = client.clone();
            std::thread::spawn(move || client.connect("s1".into(), "token".into()))
        };
        while !engine.calls.lock().unwrap().iter().any(|c| c == "connect:s1") {
            std::thread::yield_now();
        }
        client
            .post_engine_event(
                r#"{"session":{"sessionId":"s1","event":{"connected":{"connection":{"connectionId":"c1"}}}}}"#.into(),
            )
            .unwrap();
        connecting.join().unwrap().unwrap();

        let info = client.get_session_info("s1".into()).unwrap().unwrap();
        assert_eq!(info.connection_status, ConnectionStatus::Connected);
        assert_eq!(info.connection_id.as_deref(), Some("c1"));
        let names: Vec<String> = events.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, vec!["s1:session:sessionDidConnect".to_string()]);
        client.shutdown();
    }

    #[test]
    fn test_errors_cross_the_boundary() {
        let (client, _engine, _dir) = client();
        assert!(matches!(
            client.connect("missing".into(), "t".into()),
            Err(BridgeFfiError::NotFound { .. })
        ));
        assert!(matches!(
            client.init_session("k".into(), "s1".into(), "{not json".into()),
            Err(BridgeFfiError::InvalidJson { .. })
        ));
        client.init_session("k".into(), "s1".into(), String::new()).unwrap();
        match client.set_encryption_secret("s1".into(), "x".into()) {
            Err(BridgeFfiError::Engine { code, .. }) => assert_eq!(code, "1500"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            client.post_engine_event("{}".into()),
            Err(BridgeFfiError::InvalidJson { .. })
        ));
        client.shutdown();
        assert!(matches!(client.get_supported_codecs(), Err(BridgeFfiError::ShutDown)));
    }

    #[test]
    fn test_publisher_properties_reach_the_engine_as_json() {
        let (client, engine, _dir) = client();
        client.init_publisher("p1".into(), r#"{"cameraPosition":"back"}"#.into()).unwrap();
        client.change_camera_position("p1".into(), "front".into()).unwrap();
        client.camera_torch("p1".into(), true).unwrap();
        let calls = engine.calls.lock().unwrap().clone();
        assert!(calls.iter().any(|c| c.starts_with("create_publisher:p1:{")));
        assert!(calls.contains(&"set_publisher_property:p1:cameraPosition=\"front\"".to_string()));
        assert!(calls.contains(&"set_publisher_property:p1:cameraTorch=true".to_string()));
        client.shutdown();
    }

    #[test]
    fn test_enable_logs_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().to_string();
        {
            let client = BridgeClient::new(path.clone(), Arc::new(RecordingEngine::default())).unwrap();
            client.enable_logs(true).unwrap();
            client.set_platform(Platform::Android);
            client.shutdown();
        }
        let store = SettingsStore::new(&path);
        assert!(store.get().logs_enabled);
        assert_eq!(store.get().platform, PlatformFamily::Android);
    }
}
