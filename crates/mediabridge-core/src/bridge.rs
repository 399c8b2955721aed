//! The bridge worker and the handle the host talks to.
//!
//! One tokio task owns the engine, the registry and the subscription table.
//! Host commands and engine callbacks are queued onto the same FIFO and
//! handled strictly one at a time, so nothing here needs a lock.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::dispatcher::{Command, Reply};
use crate::engine::{EngineEvent, EngineEventSink, MediaEngine};
use crate::errors::{BridgeError, ValidationError};
use crate::events::{BridgeEventListener, EventKey, Scope, SubscriptionTable};
use crate::model::{
    Capabilities, CameraPosition, ConnectionStatus, PublisherProperty, SessionInfo, Signal, SubscriberProperty,
    SupportedCodecs, TransformerChain, VideoContentHint,
};
use crate::registry::{CompletionKey, PurgeReport, Registry};
use crate::sanitizer::{parse_preferred_frame_rate, parse_preferred_resolution};
use crate::settings::BridgeSettings;

pub(crate) enum Task {
    Command(Command),
    Engine(EngineEvent),
    CompletionTimeout { key: CompletionKey, generation: u64 },
    Shutdown(oneshot::Sender<()>),
}

pub(crate) type EngineRegistry<E> =
    Registry<<E as MediaEngine>::Session, <E as MediaEngine>::Publisher, <E as MediaEngine>::Subscriber>;

pub(crate) struct Worker<E: MediaEngine> {
    pub(crate) engine: E,
    pub(crate) registry: EngineRegistry<E>,
    pub(crate) subscriptions: SubscriptionTable,
    pub(crate) settings: BridgeSettings,
    /// Lets timers post back without keeping the queue alive.
    pub(crate) timers: mpsc::WeakUnboundedSender<Task>,
}

impl<E: MediaEngine> Worker<E> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Task>) {
        tracing::info!("bridge worker started");
        while let Some(task) = rx.recv().await {
            match task {
                Task::Command(command) => self.execute(command),
                Task::Engine(event) => self.route(event),
                Task::CompletionTimeout { key, generation } => self.expire(key, generation),
                Task::Shutdown(done) => {
                    self.shutdown();
                    let _ = done.send(());
                    break;
                }
            }
        }
        tracing::info!("bridge worker stopped");
    }

    /// Remove a session and everything scoped to it. Pending completions for
    /// the scope are dropped; a pending publisher destroy succeeds.
    pub(crate) fn purge_session(&mut self, session_id: &str) -> PurgeReport {
        let report = self.registry.purge_session(session_id);
        self.subscriptions
            .purge_scope(&Scope::Session(session_id.to_string()));
        for publisher_id in &report.destroyed_publishers {
            self.subscriptions
                .purge_scope(&Scope::Publisher(publisher_id.clone()));
        }
        lifecycle!(
            self,
            session_id,
            removed = report.removed_entries(),
            cancelled = report.cancelled_completions,
            "session scope purged"
        );
        report
    }

    /// Best-effort engine teardown followed by a scope purge. Used for
    /// component unmount and for re-initialising an existing session id.
    pub(crate) fn teardown_session(&mut self, session_id: &str) -> PurgeReport {
        if let Ok(entry) = self.registry.sessions.get(session_id) {
            for subscriber in self
                .registry
                .subscribers
                .values()
                .filter(|s| s.record.session_id == session_id)
            {
                if let Err(e) = self.engine.unsubscribe(&entry.handle, &subscriber.handle) {
                    tracing::warn!(session_id, "unsubscribe during teardown failed: {e}");
                }
            }
            if !matches!(
                entry.record.status,
                ConnectionStatus::Disconnected | ConnectionStatus::Failed
            ) {
                if let Err(e) = self.engine.disconnect(&entry.handle) {
                    tracing::warn!(session_id, "disconnect during teardown failed: {e}");
                }
            }
        }
        self.purge_session(session_id)
    }

    fn shutdown(&mut self) {
        for session_id in self.registry.sessions.ids() {
            self.teardown_session(&session_id);
        }
        let dropped = self.registry.clear();
        self.subscriptions.clear();
        tracing::info!(dropped, "bridge shut down");
    }
}

/// Cloneable front door to the bridge worker.
///
/// Every method enqueues its command immediately and returns a [`Request`]
/// that resolves with the worker's answer. Commands from one handle run in
/// call order.
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::UnboundedSender<Task>,
}

impl BridgeHandle {
    /// Start the worker on the current tokio runtime.
    pub fn spawn<E: MediaEngine>(mut engine: E, settings: BridgeSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        engine.bind(EngineEventSink::new(tx.clone()));
        let worker = Worker {
            engine,
            registry: Registry::new(),
            subscriptions: SubscriptionTable::new(),
            settings,
            timers: tx.downgrade(),
        };
        tokio::spawn(worker.run(rx));
        Self { tx }
    }

    /// Sink for engine callbacks, routed through the same queue as commands.
    pub fn event_sink(&self) -> EngineEventSink {
        EngineEventSink::new(self.tx.clone())
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Request<T> {
        let (reply, rx) = oneshot::channel();
        let rx = match self.tx.send(Task::Command(make(reply))) {
            Ok(()) => Some(rx),
            Err(_) => None,
        };
        Request { rx, tx: self.tx.clone() }
    }

    // ── Sessions ─────────────────────────────────────────────────────

    /// Returns the diagnostics raised while sanitizing `options`.
    pub fn init_session(&self, api_key: &str, session_id: &str, options: &Value) -> Request<Vec<ValidationError>> {
        self.request(|reply| Command::InitSession {
            api_key: api_key.to_string(),
            session_id: session_id.to_string(),
            options: options.clone(),
            reply,
        })
    }

    /// Resolves once the engine reports the session connected or failed.
    pub fn connect(&self, session_id: &str, token: &str) -> Request<()> {
        self.request(|reply| Command::Connect {
            session_id: session_id.to_string(),
            token: token.to_string(),
            reply,
        })
    }

    /// Resolves once the engine reports the session disconnected.
    pub fn disconnect_session(&self, session_id: &str) -> Request<()> {
        self.request(|reply| Command::Disconnect {
            session_id: session_id.to_string(),
            reply,
        })
    }

    /// Unmount path: no completion to wait for, the scope is gone when this
    /// resolves.
    pub fn teardown_session(&self, session_id: &str) -> Request<()> {
        self.request(|reply| Command::TeardownSession {
            session_id: session_id.to_string(),
            reply,
        })
    }

    pub fn send_signal(&self, session_id: &str, signal: Signal) -> Request<()> {
        self.request(|reply| Command::SendSignal {
            session_id: session_id.to_string(),
            signal,
            reply,
        })
    }

    pub fn set_encryption_secret(&self, session_id: &str, secret: &str) -> Request<()> {
        self.request(|reply| Command::SetEncryptionSecret {
            session_id: session_id.to_string(),
            secret: secret.to_string(),
            reply,
        })
    }

    pub fn force_mute_all(&self, session_id: &str, excluded_stream_ids: Vec<String>) -> Request<()> {
        self.request(|reply| Command::ForceMuteAll {
            session_id: session_id.to_string(),
            excluded_stream_ids,
            reply,
        })
    }

    pub fn force_mute_stream(&self, session_id: &str, stream_id: &str) -> Request<()> {
        self.request(|reply| Command::ForceMuteStream {
            session_id: session_id.to_string(),
            stream_id: stream_id.to_string(),
            reply,
        })
    }

    pub fn disable_force_mute(&self, session_id: &str) -> Request<()> {
        self.request(|reply| Command::DisableForceMute {
            session_id: session_id.to_string(),
            reply,
        })
    }

    pub fn force_disconnect(&self, session_id: &str, connection_id: &str) -> Request<()> {
        self.request(|reply| Command::ForceDisconnect {
            session_id: session_id.to_string(),
            connection_id: connection_id.to_string(),
            reply,
        })
    }

    /// `None` when the session is unknown.
    pub fn get_session_info(&self, session_id: &str) -> Request<Option<SessionInfo>> {
        self.request(|reply| Command::GetSessionInfo {
            session_id: session_id.to_string(),
            reply,
        })
    }

    pub fn get_session_capabilities(&self, session_id: &str) -> Request<Capabilities> {
        self.request(|reply| Command::GetSessionCapabilities {
            session_id: session_id.to_string(),
            reply,
        })
    }

    pub fn report_issue(&self, session_id: &str) -> Request<String> {
        self.request(|reply| Command::ReportIssue {
            session_id: session_id.to_string(),
            reply,
        })
    }

    pub fn get_supported_codecs(&self) -> Request<SupportedCodecs> {
        self.request(|reply| Command::GetSupportedCodecs { reply })
    }

    // ── Publishers ───────────────────────────────────────────────────

    pub fn init_publisher(&self, publisher_id: &str, properties: &Value) -> Request<Vec<ValidationError>> {
        self.request(|reply| Command::InitPublisher {
            publisher_id: publisher_id.to_string(),
            properties: properties.clone(),
            reply,
        })
    }

    pub fn publish(&self, session_id: &str, publisher_id: &str) -> Request<()> {
        self.request(|reply| Command::Publish {
            session_id: session_id.to_string(),
            publisher_id: publisher_id.to_string(),
            reply,
        })
    }

    pub fn unpublish(&self, publisher_id: &str) -> Request<()> {
        self.request(|reply| Command::Unpublish {
            publisher_id: publisher_id.to_string(),
            reply,
        })
    }

    /// Succeeds immediately unless the publisher is live on a connected
    /// session, in which case it waits for the engine to tear the stream down.
    pub fn destroy_publisher(&self, publisher_id: &str) -> Request<()> {
        self.request(|reply| Command::DestroyPublisher {
            publisher_id: publisher_id.to_string(),
            reply,
        })
    }

    pub fn set_publisher_property(&self, publisher_id: &str, property: PublisherProperty) -> Request<()> {
        self.request(|reply| Command::SetPublisherProperty {
            publisher_id: publisher_id.to_string(),
            property,
            reply,
        })
    }

    pub fn publish_audio(&self, publisher_id: &str, enabled: bool) -> Request<()> {
        self.set_publisher_property(publisher_id, PublisherProperty::PublishAudio(enabled))
    }

    pub fn publish_video(&self, publisher_id: &str, enabled: bool) -> Request<()> {
        self.set_publisher_property(publisher_id, PublisherProperty::PublishVideo(enabled))
    }

    pub fn publish_captions(&self, publisher_id: &str, enabled: bool) -> Request<()> {
        self.set_publisher_property(publisher_id, PublisherProperty::PublishCaptions(enabled))
    }

    pub fn camera_torch(&self, publisher_id: &str, enabled: bool) -> Request<()> {
        self.set_publisher_property(publisher_id, PublisherProperty::CameraTorch(enabled))
    }

    pub fn camera_zoom_factor(&self, publisher_id: &str, factor: f32) -> Request<()> {
        self.set_publisher_property(publisher_id, PublisherProperty::CameraZoomFactor(factor))
    }

    pub fn change_camera_position(&self, publisher_id: &str, position: &str) -> Request<()> {
        self.set_publisher_property(
            publisher_id,
            PublisherProperty::CameraPosition(CameraPosition::parse(position)),
        )
    }

    pub fn change_video_content_hint(&self, publisher_id: &str, hint: &str) -> Request<()> {
        self.set_publisher_property(
            publisher_id,
            PublisherProperty::VideoContentHint(VideoContentHint::parse(hint)),
        )
    }

    /// Returns diagnostics for dropped entries.
    pub fn set_audio_transformers(&self, publisher_id: &str, transformers: &Value) -> Request<Vec<ValidationError>> {
        self.set_transformers(publisher_id, TransformerChain::Audio, transformers)
    }

    pub fn set_video_transformers(&self, publisher_id: &str, transformers: &Value) -> Request<Vec<ValidationError>> {
        self.set_transformers(publisher_id, TransformerChain::Video, transformers)
    }

    fn set_transformers(
        &self,
        publisher_id: &str,
        chain: TransformerChain,
        transformers: &Value,
    ) -> Request<Vec<ValidationError>> {
        self.request(|reply| Command::SetTransformers {
            publisher_id: publisher_id.to_string(),
            chain,
            transformers: transformers.clone(),
            reply,
        })
    }

    /// Stats arrive later as `rtcStatsReport` publisher events.
    pub fn get_publisher_rtc_stats_report(&self, publisher_id: &str) -> Request<()> {
        self.request(|reply| Command::RequestPublisherStats {
            publisher_id: publisher_id.to_string(),
            reply,
        })
    }

    // ── Subscribers ──────────────────────────────────────────────────

    /// Returns the stream id, which doubles as the subscriber id.
    pub fn subscribe_to_stream(&self, stream_id: &str, session_id: &str, properties: &Value) -> Request<String> {
        self.request(|reply| Command::SubscribeToStream {
            stream_id: stream_id.to_string(),
            session_id: session_id.to_string(),
            properties: properties.clone(),
            reply,
        })
    }

    pub fn remove_subscriber(&self, stream_id: &str) -> Request<()> {
        self.request(|reply| Command::RemoveSubscriber {
            stream_id: stream_id.to_string(),
            reply,
        })
    }

    pub fn set_subscriber_property(&self, stream_id: &str, property: SubscriberProperty) -> Request<()> {
        self.request(|reply| Command::SetSubscriberProperty {
            stream_id: stream_id.to_string(),
            property,
            reply,
        })
    }

    pub fn subscribe_to_audio(&self, stream_id: &str, enabled: bool) -> Request<()> {
        self.set_subscriber_property(stream_id, SubscriberProperty::SubscribeToAudio(enabled))
    }

    pub fn subscribe_to_video(&self, stream_id: &str, enabled: bool) -> Request<()> {
        self.set_subscriber_property(stream_id, SubscriberProperty::SubscribeToVideo(enabled))
    }

    pub fn subscribe_to_captions(&self, stream_id: &str, enabled: bool) -> Request<()> {
        self.set_subscriber_property(stream_id, SubscriberProperty::SubscribeToCaptions(enabled))
    }

    /// Accepts `{width, height}` or `"WxH"`; anything else clears the preference.
    pub fn set_preferred_resolution(&self, stream_id: &str, resolution: &Value) -> Request<()> {
        self.set_subscriber_property(
            stream_id,
            SubscriberProperty::PreferredResolution(parse_preferred_resolution(resolution)),
        )
    }

    /// Non-positive or non-numeric values clear the preference.
    pub fn set_preferred_frame_rate(&self, stream_id: &str, frame_rate: &Value) -> Request<()> {
        self.set_subscriber_property(
            stream_id,
            SubscriberProperty::PreferredFrameRate(parse_preferred_frame_rate(Some(frame_rate))),
        )
    }

    pub fn set_audio_volume(&self, stream_id: &str, volume: f64) -> Request<()> {
        self.set_subscriber_property(stream_id, SubscriberProperty::AudioVolume(volume))
    }

    /// Stats arrive later as `subscriber:rtcStatsReport` events.
    pub fn get_subscriber_rtc_stats_report(&self, stream_id: &str) -> Request<()> {
        self.request(|reply| Command::RequestSubscriberStats {
            stream_id: stream_id.to_string(),
            reply,
        })
    }

    // ── Events and logging ───────────────────────────────────────────

    pub fn enable_logs(&self, enabled: bool) -> Request<()> {
        self.request(|reply| Command::EnableLogs { enabled, reply })
    }

    pub fn subscribe(&self, key: EventKey, listener: Arc<dyn BridgeEventListener>) -> Request<()> {
        self.request(|reply| Command::Subscribe { key, listener, reply })
    }

    /// Removes every listener on `key`. Returns how many there were.
    pub fn unsubscribe(&self, key: EventKey) -> Request<usize> {
        self.request(|reply| Command::Unsubscribe { key, reply })
    }

    /// Listener that sees every event.
    pub fn add_listener(&self, listener: Arc<dyn BridgeEventListener>) -> Request<()> {
        self.request(|reply| Command::AddListener { listener, reply })
    }

    /// Host-side receiver for events enabled through `set_native_events`.
    pub fn set_host_sink(&self, sink: Option<Arc<dyn BridgeEventListener>>) -> Request<()> {
        self.request(|reply| Command::SetHostSink { sink, reply })
    }

    pub fn set_native_events(&self, names: Vec<String>) -> Request<()> {
        self.request(|reply| Command::SetNativeEvents { names, reply })
    }

    pub fn remove_native_events(&self, names: Vec<String>) -> Request<()> {
        self.request(|reply| Command::RemoveNativeEvents { names, reply })
    }

    /// Tear everything down and stop the worker. Later requests fail with
    /// `ShutDown`.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(Task::Shutdown(done)).is_ok() {
            let _ = rx.await;
        }
    }
}

/// Answer to one command. Await it to get the worker's result.
///
/// The command is already queued when this is created; dropping it only
/// discards the answer.
#[must_use = "the result of the command is only observable by awaiting it"]
pub struct Request<T> {
    rx: Option<oneshot::Receiver<Result<T, BridgeError>>>,
    tx: mpsc::UnboundedSender<Task>,
}

impl<T: Send + 'static> IntoFuture for Request<T> {
    type Output = Result<T, BridgeError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let Some(rx) = self.rx else {
                return Err(BridgeError::ShutDown);
            };
            match rx.await {
                Ok(result) => result,
                Err(_) if self.tx.is_closed() => Err(BridgeError::ShutDown),
                Err(_) => Err(BridgeError::Cancelled),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockEngine;

    #[tokio::test]
    async fn requests_after_shutdown_fail() {
        let (engine, _probe) = MockEngine::new();
        let bridge = BridgeHandle::spawn(engine, BridgeSettings::default());
        assert!(bridge.is_running());

        bridge.shutdown().await;
        assert!(!bridge.is_running());
        assert_eq!(
            bridge.get_supported_codecs().await,
            Err(BridgeError::ShutDown)
        );
        // Idempotent.
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_connect() {
        let (engine, _probe) = MockEngine::new();
        let bridge = BridgeHandle::spawn(engine, BridgeSettings::default());
        bridge.init_session("key", "s1", &Value::Null).await.unwrap();

        let connecting = bridge.connect("s1", "token");
        bridge.shutdown().await;
        assert!(matches!(
            connecting.await,
            Err(BridgeError::ShutDown | BridgeError::Cancelled)
        ));
    }
}
