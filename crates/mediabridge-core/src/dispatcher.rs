//! Host commands, executed on the bridge worker.
//!
//! Every command follows the same path: sanitize input, look up the records
//! it names (a miss is `NotFound` and the engine is not called), call the
//! engine, then either answer right away or park a completion that an engine
//! callback will resolve.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::bridge::{Task, Worker};
use crate::engine::MediaEngine;
use crate::errors::{BridgeError, CompletionKind, EngineError, ResourceKind, ValidationError};
use crate::events::{BridgeEventListener, EventKey, Scope};
use crate::model::{
    Capabilities, ConnectionStatus, PublisherProperty, PublisherRecord, SessionInfo, SessionRecord, Signal,
    SubscriberProperty, SubscriberRecord, SupportedCodecs, TransformerChain,
};
use crate::registry::{Completion, CompletionKey, PublisherEntry, SessionEntry, SubscriberEntry};
use crate::sanitizer::{
    Sanitized, sanitize_publisher_settings, sanitize_session_options, sanitize_subscriber_settings,
    sanitize_transformers,
};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, BridgeError>>;

pub(crate) enum Command {
    InitSession {
        api_key: String,
        session_id: String,
        options: Value,
        reply: Reply<Vec<ValidationError>>,
    },
    Connect {
        session_id: String,
        token: String,
        reply: Completion,
    },
    Disconnect {
        session_id: String,
        reply: Completion,
    },
    TeardownSession {
        session_id: String,
        reply: Reply<()>,
    },
    InitPublisher {
        publisher_id: String,
        properties: Value,
        reply: Reply<Vec<ValidationError>>,
    },
    Publish {
        session_id: String,
        publisher_id: String,
        reply: Reply<()>,
    },
    Unpublish {
        publisher_id: String,
        reply: Reply<()>,
    },
    DestroyPublisher {
        publisher_id: String,
        reply: Completion,
    },
    SetPublisherProperty {
        publisher_id: String,
        property: PublisherProperty,
        reply: Reply<()>,
    },
    SetTransformers {
        publisher_id: String,
        chain: TransformerChain,
        transformers: Value,
        reply: Reply<Vec<ValidationError>>,
    },
    RequestPublisherStats {
        publisher_id: String,
        reply: Reply<()>,
    },
    SubscribeToStream {
        stream_id: String,
        session_id: String,
        properties: Value,
        reply: Reply<String>,
    },
    RemoveSubscriber {
        stream_id: String,
        reply: Reply<()>,
    },
    SetSubscriberProperty {
        stream_id: String,
        property: SubscriberProperty,
        reply: Reply<()>,
    },
    RequestSubscriberStats {
        stream_id: String,
        reply: Reply<()>,
    },
    SendSignal {
        session_id: String,
        signal: Signal,
        reply: Reply<()>,
    },
    SetEncryptionSecret {
        session_id: String,
        secret: String,
        reply: Reply<()>,
    },
    ForceMuteAll {
        session_id: String,
        excluded_stream_ids: Vec<String>,
        reply: Reply<()>,
    },
    ForceMuteStream {
        session_id: String,
        stream_id: String,
        reply: Reply<()>,
    },
    DisableForceMute {
        session_id: String,
        reply: Reply<()>,
    },
    ForceDisconnect {
        session_id: String,
        connection_id: String,
        reply: Reply<()>,
    },
    GetSessionInfo {
        session_id: String,
        reply: Reply<Option<SessionInfo>>,
    },
    GetSessionCapabilities {
        session_id: String,
        reply: Reply<Capabilities>,
    },
    ReportIssue {
        session_id: String,
        reply: Reply<String>,
    },
    GetSupportedCodecs {
        reply: Reply<SupportedCodecs>,
    },
    EnableLogs {
        enabled: bool,
        reply: Reply<()>,
    },
    Subscribe {
        key: EventKey,
        listener: Arc<dyn BridgeEventListener>,
        reply: Reply<()>,
    },
    Unsubscribe {
        key: EventKey,
        reply: Reply<usize>,
    },
    AddListener {
        listener: Arc<dyn BridgeEventListener>,
        reply: Reply<()>,
    },
    SetHostSink {
        sink: Option<Arc<dyn BridgeEventListener>>,
        reply: Reply<()>,
    },
    SetNativeEvents {
        names: Vec<String>,
        reply: Reply<()>,
    },
    RemoveNativeEvents {
        names: Vec<String>,
        reply: Reply<()>,
    },
}

fn answer<T>(reply: Reply<T>, result: Result<T, BridgeError>) {
    if let Err(Err(e)) = reply.send(result) {
        tracing::debug!("caller went away before seeing error: {e}");
    }
}

impl<E: MediaEngine> Worker<E> {
    pub(crate) fn execute(&mut self, command: Command) {
        match command {
            Command::InitSession { api_key, session_id, options, reply } => {
                answer(reply, self.init_session(&api_key, &session_id, &options))
            }
            Command::Connect { session_id, token, reply } => self.connect(&session_id, &token, reply),
            Command::Disconnect { session_id, reply } => self.disconnect(&session_id, reply),
            Command::TeardownSession { session_id, reply } => {
                self.teardown_session(&session_id);
                answer(reply, Ok(()))
            }
            Command::InitPublisher { publisher_id, properties, reply } => {
                answer(reply, self.init_publisher(&publisher_id, &properties))
            }
            Command::Publish { session_id, publisher_id, reply } => {
                answer(reply, self.publish(&session_id, &publisher_id))
            }
            Command::Unpublish { publisher_id, reply } => answer(reply, self.unpublish(&publisher_id)),
            Command::DestroyPublisher { publisher_id, reply } => self.destroy_publisher(&publisher_id, reply),
            Command::SetPublisherProperty { publisher_id, property, reply } => {
                answer(reply, self.set_publisher_property(&publisher_id, property))
            }
            Command::SetTransformers { publisher_id, chain, transformers, reply } => {
                answer(reply, self.set_transformers(&publisher_id, chain, &transformers))
            }
            Command::RequestPublisherStats { publisher_id, reply } => {
                let result = self
                    .registry
                    .publishers
                    .get(&publisher_id)
                    .and_then(|p| self.engine.request_publisher_stats(&p.handle).map_err(BridgeError::from));
                answer(reply, result)
            }
            Command::SubscribeToStream { stream_id, session_id, properties, reply } => {
                answer(reply, self.subscribe_to_stream(&stream_id, &session_id, &properties))
            }
            Command::RemoveSubscriber { stream_id, reply } => {
                self.remove_subscriber(&stream_id);
                answer(reply, Ok(()))
            }
            Command::SetSubscriberProperty { stream_id, property, reply } => {
                answer(reply, self.set_subscriber_property(&stream_id, property))
            }
            Command::RequestSubscriberStats { stream_id, reply } => {
                let result = self
                    .registry
                    .subscribers
                    .get(&stream_id)
                    .and_then(|s| self.engine.request_subscriber_stats(&s.handle).map_err(BridgeError::from));
                answer(reply, result)
            }
            Command::SendSignal { session_id, signal, reply } => answer(reply, self.send_signal(&session_id, &signal)),
            Command::SetEncryptionSecret { session_id, secret, reply } => {
                let result = self
                    .registry
                    .sessions
                    .get(&session_id)
                    .and_then(|s| self.engine.set_encryption_secret(&s.handle, &secret).map_err(BridgeError::from));
                answer(reply, result)
            }
            Command::ForceMuteAll { session_id, excluded_stream_ids, reply } => {
                answer(reply, self.force_mute_all(&session_id, &excluded_stream_ids))
            }
            Command::ForceMuteStream { session_id, stream_id, reply } => {
                answer(reply, self.force_mute_stream(&session_id, &stream_id))
            }
            Command::DisableForceMute { session_id, reply } => {
                let result = self
                    .registry
                    .sessions
                    .get(&session_id)
                    .and_then(|s| self.engine.disable_force_mute(&s.handle).map_err(BridgeError::from));
                answer(reply, result)
            }
            Command::ForceDisconnect { session_id, connection_id, reply } => {
                answer(reply, self.force_disconnect(&session_id, &connection_id))
            }
            Command::GetSessionInfo { session_id, reply } => {
                let info = self.registry.sessions.get(&session_id).ok().map(|s| SessionInfo {
                    session_id: s.record.id.clone(),
                    connection_id: s.record.connection_id.clone(),
                    connection_status: s.record.status,
                });
                answer(reply, Ok(info))
            }
            Command::GetSessionCapabilities { session_id, reply } => {
                let result = self.registry.sessions.get(&session_id).map(|s| Capabilities {
                    // Engines under-report this one.
                    can_subscribe: true,
                    ..s.record.capabilities
                });
                answer(reply, result)
            }
            Command::ReportIssue { session_id, reply } => {
                let result = self
                    .registry
                    .sessions
                    .get(&session_id)
                    .and_then(|s| self.engine.report_issue(&s.handle).map_err(BridgeError::from));
                answer(reply, result)
            }
            Command::GetSupportedCodecs { reply } => answer(reply, Ok(self.engine.supported_codecs())),
            Command::EnableLogs { enabled, reply } => {
                self.settings.logs_enabled = enabled;
                tracing::info!(enabled, "lifecycle logging toggled");
                answer(reply, Ok(()))
            }
            Command::Subscribe { key, listener, reply } => {
                self.subscriptions.subscribe(key, listener);
                answer(reply, Ok(()))
            }
            Command::Unsubscribe { key, reply } => answer(reply, Ok(self.subscriptions.unsubscribe(&key))),
            Command::AddListener { listener, reply } => {
                self.subscriptions.add_listener(listener);
                answer(reply, Ok(()))
            }
            Command::SetHostSink { sink, reply } => {
                self.subscriptions.set_host_sink(sink);
                answer(reply, Ok(()))
            }
            Command::SetNativeEvents { names, reply } => {
                self.subscriptions.set_native_events(&names);
                answer(reply, Ok(()))
            }
            Command::RemoveNativeEvents { names, reply } => {
                self.subscriptions.remove_native_events(&names);
                answer(reply, Ok(()))
            }
        }
    }

    // ── Sessions ─────────────────────────────────────────────────────

    fn init_session(
        &mut self,
        api_key: &str,
        session_id: &str,
        options: &Value,
    ) -> Result<Vec<ValidationError>, BridgeError> {
        let Sanitized { value: options, diagnostics } = sanitize_session_options(options, self.settings.platform);

        if self.registry.sessions.contains(session_id) {
            tracing::warn!(session_id, "session re-initialised, tearing down the previous instance");
            self.teardown_session(session_id);
        }

        let handle = self.engine.create_session(api_key, session_id, &options)?;
        self.registry.sessions.put(
            session_id,
            SessionEntry {
                handle,
                record: SessionRecord::new(session_id, api_key, options),
            },
        );
        lifecycle!(self, session_id, diagnostics = diagnostics.len(), "session initialised");
        Ok(diagnostics)
    }

    fn connect(&mut self, session_id: &str, token: &str, reply: Completion) {
        let key = CompletionKey::new(CompletionKind::Connect, session_id);
        let entry = match self.registry.sessions.get_mut(session_id) {
            Ok(entry) => entry,
            Err(e) => return answer(reply, Err(e)),
        };
        if self.registry.pending.is_pending(&key) {
            return answer(reply, Err(already_pending(&key)));
        }
        match entry.record.status {
            ConnectionStatus::Connected | ConnectionStatus::Reconnecting => return answer(reply, Ok(())),
            ConnectionStatus::Failed => {
                return answer(
                    reply,
                    Err(EngineError::new("SessionFailed", "session has failed, initialise it again").into()),
                );
            }
            _ => {}
        }

        if let Err(e) = self.engine.connect(&entry.handle, token) {
            tracing::warn!(session_id, "connect rejected by engine: {e}");
            return answer(reply, Err(e.into()));
        }
        entry.record.status = ConnectionStatus::Connecting;
        if let Err(reply) = self.registry.pending.reserve(key.clone(), reply) {
            answer(reply, Err(already_pending(&key)));
        }
        lifecycle!(self, session_id, "connecting");
    }

    fn disconnect(&mut self, session_id: &str, reply: Completion) {
        let key = CompletionKey::new(CompletionKind::Disconnect, session_id);
        let entry = match self.registry.sessions.get_mut(session_id) {
            Ok(entry) => entry,
            Err(e) => return answer(reply, Err(e)),
        };
        if self.registry.pending.is_pending(&key) {
            return answer(reply, Err(already_pending(&key)));
        }

        // Never connected: the engine has nothing to report back.
        if matches!(entry.record.status, ConnectionStatus::Disconnected | ConnectionStatus::Failed) {
            self.purge_session(session_id);
            return answer(reply, Ok(()));
        }

        if let Err(e) = self.engine.disconnect(&entry.handle) {
            tracing::warn!(session_id, "disconnect rejected by engine: {e}");
            return answer(reply, Err(e.into()));
        }
        entry.record.status = ConnectionStatus::Disconnecting;
        if let Err(reply) = self.registry.pending.reserve(key.clone(), reply) {
            answer(reply, Err(already_pending(&key)));
        }
        lifecycle!(self, session_id, "disconnecting");
    }

    fn send_signal(&mut self, session_id: &str, signal: &Signal) -> Result<(), BridgeError> {
        let session = self.registry.sessions.get(session_id)?;
        if let Some(to) = signal.to.as_deref().filter(|to| !to.is_empty()) {
            let connection = self.registry.connections.get(to)?;
            if connection.session_id != session_id {
                return Err(BridgeError::not_found(ResourceKind::Connection, to));
            }
        }
        self.engine.send_signal(&session.handle, signal)?;
        Ok(())
    }

    /// Unknown stream ids in the exclusion list are ignored.
    fn force_mute_all(&mut self, session_id: &str, excluded_stream_ids: &[String]) -> Result<(), BridgeError> {
        let session = self.registry.sessions.get(session_id)?;
        let excluded: Vec<String> = excluded_stream_ids
            .iter()
            .filter(|id| {
                let known = self.registry.any_stream(id).is_some();
                if !known {
                    tracing::debug!(stream_id = %id, "ignoring unknown stream in mute exclusions");
                }
                known
            })
            .cloned()
            .collect();
        self.engine.force_mute_all(&session.handle, &excluded)?;
        Ok(())
    }

    fn force_mute_stream(&mut self, session_id: &str, stream_id: &str) -> Result<(), BridgeError> {
        let session = self.registry.sessions.get(session_id)?;
        if self.registry.any_stream(stream_id).is_none() {
            return Err(BridgeError::not_found(ResourceKind::Stream, stream_id));
        }
        self.engine.force_mute_stream(&session.handle, stream_id)?;
        Ok(())
    }

    fn force_disconnect(&mut self, session_id: &str, connection_id: &str) -> Result<(), BridgeError> {
        let session = self.registry.sessions.get(session_id)?;
        self.registry.connections.get(connection_id)?;
        self.engine.force_disconnect(&session.handle, connection_id)?;
        Ok(())
    }

    // ── Publishers ───────────────────────────────────────────────────

    fn init_publisher(&mut self, publisher_id: &str, properties: &Value) -> Result<Vec<ValidationError>, BridgeError> {
        let Sanitized { value: settings, diagnostics } =
            sanitize_publisher_settings(properties, self.settings.platform);

        if self.registry.publishers.contains(publisher_id) {
            tracing::warn!(publisher_id, "publisher re-initialised, dropping the previous instance");
            self.drop_publisher(publisher_id);
        }

        let handle = self.engine.create_publisher(publisher_id, &settings)?;
        let record = PublisherRecord {
            id: publisher_id.to_string(),
            session_id: None,
            stream_id: None,
            is_publishing: false,
            publish_audio: settings.publish_audio,
            publish_video: settings.publish_video,
            publish_captions: settings.publish_captions,
            camera_torch: settings.camera_torch,
            camera_zoom_factor: settings.camera_zoom_factor,
            camera_position: settings.camera_position,
            video_content_hint: settings.video_content_hint,
            audio_transformers: Vec::new(),
            video_transformers: Vec::new(),
        };
        self.registry
            .publishers
            .put(publisher_id, PublisherEntry { handle, record });
        lifecycle!(self, publisher_id, "publisher initialised");
        Ok(diagnostics)
    }

    fn publish(&mut self, session_id: &str, publisher_id: &str) -> Result<(), BridgeError> {
        let session = self.registry.sessions.get(session_id)?;
        let publisher = self.registry.publishers.get_mut(publisher_id)?;
        self.engine.publish(&session.handle, &publisher.handle)?;
        publisher.record.session_id = Some(session_id.to_string());
        lifecycle!(self, session_id, publisher_id, "publish requested");
        Ok(())
    }

    /// The stream teardown itself is reported by the engine; this only asks.
    fn unpublish(&mut self, publisher_id: &str) -> Result<(), BridgeError> {
        let publisher = self.registry.publishers.get_mut(publisher_id)?;
        let Some(session_id) = publisher.record.session_id.clone() else {
            return Ok(());
        };
        match self.registry.sessions.get(&session_id) {
            Ok(session) if session.record.status.is_live() => {
                self.engine.unpublish(&session.handle, &publisher.handle)?;
            }
            _ => publisher.record.detach(),
        }
        Ok(())
    }

    fn destroy_publisher(&mut self, publisher_id: &str, reply: Completion) {
        let key = CompletionKey::new(CompletionKind::DestroyPublisher, publisher_id);
        let Ok(publisher) = self.registry.publishers.get(publisher_id) else {
            return answer(reply, Ok(()));
        };
        if self.registry.pending.is_pending(&key) {
            return answer(reply, Err(already_pending(&key)));
        }

        let live_session = publisher
            .record
            .session_id
            .as_deref()
            .and_then(|sid| self.registry.sessions.get(sid).ok())
            .filter(|s| s.record.status.is_live());
        let Some(session) = live_session else {
            // Nothing will ever confirm an unpublish here.
            self.drop_publisher(publisher_id);
            return answer(reply, Ok(()));
        };

        if let Err(e) = self.engine.unpublish(&session.handle, &publisher.handle) {
            tracing::warn!(publisher_id, "unpublish rejected by engine: {e}");
            return answer(reply, Err(e.into()));
        }
        let generation = match self.registry.pending.reserve(key.clone(), reply) {
            Ok(generation) => generation,
            Err(reply) => return answer(reply, Err(already_pending(&key))),
        };
        lifecycle!(self, publisher_id, "waiting for publisher stream teardown");

        if let Some(timeout_ms) = self.settings.publisher_destroy_timeout_ms {
            let timers = self.timers.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                if let Some(tx) = timers.upgrade() {
                    let _ = tx.send(Task::CompletionTimeout { key, generation });
                }
            });
        }
    }

    /// A publisher destroy the engine never confirmed. The publisher is
    /// removed anyway and the caller gets `Ok`.
    pub(crate) fn expire(&mut self, key: CompletionKey, generation: u64) {
        if !self.registry.pending.resolve_generation(&key, generation, Ok(())) {
            return;
        }
        tracing::warn!(
            publisher_id = %key.id,
            "engine never confirmed unpublish, destroying publisher anyway"
        );
        self.drop_publisher(&key.id);
    }

    /// Remove a publisher and everything hanging off it, without waiting on
    /// the engine. Any pending destroy for it resolves `Ok`.
    pub(crate) fn drop_publisher(&mut self, publisher_id: &str) {
        let Some(entry) = self.registry.publishers.remove(publisher_id) else {
            return;
        };
        if let Some(stream_id) = entry.record.stream_id.as_deref() {
            self.registry.publisher_streams.remove(stream_id);
            self.registry.streams.remove(stream_id);
        }
        if let Some(session_id) = entry.record.session_id.as_deref() {
            if let Ok(session) = self.registry.sessions.get(session_id) {
                if session.record.status.is_live() {
                    if let Err(e) = self.engine.unpublish(&session.handle, &entry.handle) {
                        tracing::debug!(publisher_id, "unpublish on drop failed: {e}");
                    }
                }
            }
        }
        let key = CompletionKey::new(CompletionKind::DestroyPublisher, publisher_id);
        self.registry.pending.resolve(&key, Ok(()));
        self.subscriptions
            .purge_scope(&Scope::Publisher(publisher_id.to_string()));
        lifecycle!(self, publisher_id, "publisher destroyed");
    }

    fn set_publisher_property(&mut self, publisher_id: &str, property: PublisherProperty) -> Result<(), BridgeError> {
        let publisher = self.registry.publishers.get_mut(publisher_id)?;
        self.engine.apply_publisher_property(&publisher.handle, &property)?;
        publisher.record.apply(&property);
        Ok(())
    }

    fn set_transformers(
        &mut self,
        publisher_id: &str,
        chain: TransformerChain,
        transformers: &Value,
    ) -> Result<Vec<ValidationError>, BridgeError> {
        let publisher = self.registry.publishers.get_mut(publisher_id)?;
        let Sanitized { value: transformers, diagnostics } = sanitize_transformers(transformers);
        self.engine
            .set_transformers(&publisher.handle, chain, &transformers)?;
        *publisher.record.transformers_mut(chain) = transformers;
        Ok(diagnostics)
    }

    // ── Subscribers ──────────────────────────────────────────────────

    fn subscribe_to_stream(
        &mut self,
        stream_id: &str,
        session_id: &str,
        properties: &Value,
    ) -> Result<String, BridgeError> {
        let Sanitized { value: settings, diagnostics } = sanitize_subscriber_settings(properties);
        if !diagnostics.is_empty() {
            tracing::debug!(stream_id, dropped = diagnostics.len(), "subscriber options had unknown keys");
        }

        self.registry.sessions.get(session_id)?;
        let info = match self.registry.streams.get(stream_id)? {
            stream if stream.session_id == session_id => stream.info.clone(),
            _ => return Err(BridgeError::not_found(ResourceKind::Stream, stream_id)),
        };

        if self.registry.subscribers.contains(stream_id) {
            tracing::warn!(stream_id, "stream already subscribed, replacing subscriber");
            self.unsubscribe_quietly(stream_id);
        }

        let session = self.registry.sessions.get(session_id)?;
        let handle = self.engine.create_subscriber(&info, &settings)?;
        self.engine.subscribe(&session.handle, &handle)?;

        let mut record = SubscriberRecord {
            stream_id: stream_id.to_string(),
            session_id: session_id.to_string(),
            subscribe_to_audio: settings.subscribe_to_audio,
            subscribe_to_video: settings.subscribe_to_video,
            subscribe_to_captions: settings.subscribe_to_captions,
            preferred_resolution: None,
            preferred_frame_rate: None,
            audio_volume: 100.0,
        };
        let mut preferences = Vec::new();
        if settings.preferred_resolution.is_some() {
            preferences.push(SubscriberProperty::PreferredResolution(settings.preferred_resolution));
        }
        if settings.preferred_frame_rate.is_some() {
            preferences.push(SubscriberProperty::PreferredFrameRate(settings.preferred_frame_rate));
        }
        if let Some(volume) = settings.audio_volume {
            preferences.push(SubscriberProperty::AudioVolume(volume));
        }
        for property in &preferences {
            match self.engine.apply_subscriber_property(&handle, property) {
                Ok(()) => record.apply(property),
                Err(e) => tracing::warn!(stream_id, "could not apply {property:?}: {e}"),
            }
        }

        self.registry
            .subscribers
            .put(stream_id, SubscriberEntry { handle, record });
        lifecycle!(self, session_id, stream_id, "subscribed to stream");
        Ok(stream_id.to_string())
    }

    /// Idempotent. Also forgets the stream, matching what the host expects
    /// after unmounting a subscriber view.
    fn remove_subscriber(&mut self, stream_id: &str) {
        self.unsubscribe_quietly(stream_id);
        self.registry.streams.remove(stream_id);
    }

    fn unsubscribe_quietly(&mut self, stream_id: &str) {
        let Some(entry) = self.registry.subscribers.remove(stream_id) else {
            return;
        };
        if let Ok(session) = self.registry.sessions.get(&entry.record.session_id) {
            if let Err(e) = self.engine.unsubscribe(&session.handle, &entry.handle) {
                tracing::debug!(stream_id, "unsubscribe failed: {e}");
            }
        }
        lifecycle!(self, stream_id, "subscriber removed");
    }

    fn set_subscriber_property(&mut self, stream_id: &str, property: SubscriberProperty) -> Result<(), BridgeError> {
        let subscriber = self.registry.subscribers.get_mut(stream_id)?;
        self.engine
            .apply_subscriber_property(&subscriber.handle, &property)?;
        subscriber.record.apply(&property);
        Ok(())
    }
}

fn already_pending(key: &CompletionKey) -> BridgeError {
    BridgeError::AlreadyPending {
        kind: key.kind,
        id: key.id.clone(),
    }
}
