use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kinds of records tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Session,
    Publisher,
    Subscriber,
    Stream,
    PublisherStream,
    Connection,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Session => "session",
            ResourceKind::Publisher => "publisher",
            ResourceKind::Subscriber => "subscriber",
            ResourceKind::Stream => "stream",
            ResourceKind::PublisherStream => "publisher stream",
            ResourceKind::Connection => "connection",
        };
        f.write_str(name)
    }
}

/// Asynchronous commands that park a one-shot completion in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionKind {
    Connect,
    Disconnect,
    DestroyPublisher,
}

impl fmt::Display for CompletionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompletionKind::Connect => "connect",
            CompletionKind::Disconnect => "disconnect",
            CompletionKind::DestroyPublisher => "destroy publisher",
        };
        f.write_str(name)
    }
}

/// Failure reported by the media engine, passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("engine error {code}: {message}")]
pub struct EngineError {
    pub code: String,
    pub message: String,
}

impl EngineError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// An option key the sanitizer refused. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{key}: {message}")]
pub struct ValidationError {
    pub key: String,
    pub message: String,
}

impl ValidationError {
    pub fn unknown_key(key: &str) -> Self {
        Self {
            key: key.to_string(),
            message: format!("{key} is not a valid option"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("a {kind} completion is already pending for {id}")]
    AlreadyPending { kind: CompletionKind, id: String },
    #[error("completion dropped before the engine answered")]
    Cancelled,
    #[error("bridge worker is shut down")]
    ShutDown,
}

impl BridgeError {
    pub fn not_found(kind: ResourceKind, id: &str) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
