//! Media bridge core.
//!
//! Pure Rust crate with no platform dependencies. Sits between a host UI
//! layer and a native media engine: sanitizes host options, keeps the
//! registry of sessions, publishers, subscribers and streams, and turns
//! engine callbacks into scoped events.
//! Consumed by native UI shells via UniFFI bindings.

/// Lifecycle line, at `info` when host logging is on and `debug` otherwise.
macro_rules! lifecycle {
    ($worker:expr, $($arg:tt)+) => {
        if $worker.settings.logs_enabled {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

pub mod bridge;
mod dispatcher;
pub mod engine;
pub mod errors;
pub mod events;
pub mod model;
pub mod payload;
pub mod registry;
mod router;
pub mod sanitizer;
pub mod settings;

#[cfg(test)]
mod test_support;

pub use bridge::{BridgeHandle, Request};
pub use engine::{EngineEvent, EngineEventSink, MediaEngine, PublisherEvent, SessionEvent, StreamEvent, SubscriberEvent};
pub use errors::{BridgeError, EngineError, ValidationError};
pub use events::{BridgeEvent, BridgeEventListener, EventKey, Scope};
pub use sanitizer::PlatformFamily;
pub use settings::{BridgeSettings, SettingsStore};
