//! JSON payloads handed to listeners.

use serde_json::{Map, Value, json};

use crate::errors::{EngineError, ResourceKind};
use crate::model::{ConnectionInfo, SessionRecord, StreamInfo};

pub fn connection(info: &ConnectionInfo) -> Value {
    json!({
        "connectionId": info.connection_id,
        "creationTime": info.creation_time,
        "data": info.data,
    })
}

pub fn connection_event(info: &ConnectionInfo, session_id: &str) -> Value {
    let mut payload = connection(info);
    payload["sessionId"] = json!(session_id);
    payload
}

pub fn session(record: &SessionRecord, own_connection: Option<&ConnectionInfo>) -> Value {
    json!({
        "sessionId": record.id,
        "connection": own_connection.map(connection),
        "connectionStatus": record.status,
    })
}

pub fn stream(info: &StreamInfo, session_id: &str, connection_info: Option<&ConnectionInfo>) -> Value {
    let owner = match connection_info {
        Some(c) => connection(c),
        None => json!({ "connectionId": info.connection_id }),
    };
    json!({
        "streamId": info.stream_id,
        "name": info.name,
        "sessionId": session_id,
        "connectionId": info.connection_id,
        "connection": owner,
        "hasAudio": info.has_audio,
        "hasVideo": info.has_video,
        "hasCaptions": info.has_captions,
        "videoType": info.video_type.as_str(),
        "width": info.video_dimensions.width,
        "height": info.video_dimensions.height,
        "creationTime": info.creation_time,
    })
}

pub fn publisher_stream(info: &StreamInfo, session_id: &str, publisher_id: &str) -> Value {
    let mut payload = stream(info, session_id, None);
    payload["publisherId"] = json!(publisher_id);
    payload
}

pub fn error(error: &EngineError) -> Value {
    json!({ "code": error.code, "message": error.message })
}

/// Error payload for callbacks that name something the registry never saw.
pub fn not_found(kind: ResourceKind, id: &str) -> Value {
    json!({
        "code": "NotFound",
        "message": format!("{kind} {id} is not registered"),
    })
}

pub fn stream_property_changed(property: &str, old_value: Value, new_value: Value, stream: Value) -> Value {
    json!({
        "changedProperty": property,
        "oldValue": old_value,
        "newValue": new_value,
        "stream": stream,
    })
}

/// Subscriber payloads carry the stream when it is still known, plus
/// event-specific fields.
pub fn subscriber(stream: Option<Value>, fields: Value) -> Value {
    let mut payload = match fields {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Some(stream) = stream {
        payload.insert("stream".into(), stream);
    }
    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{VideoDimensions, VideoType};

    fn info() -> StreamInfo {
        StreamInfo {
            stream_id: "st1".into(),
            connection_id: "c1".into(),
            name: "cam".into(),
            has_audio: true,
            has_video: false,
            has_captions: false,
            video_dimensions: VideoDimensions { width: 640, height: 480 },
            video_type: VideoType::Screen,
            creation_time: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn stream_payload_shape() {
        let p = stream(&info(), "s1", None);
        assert_eq!(p["streamId"], "st1");
        assert_eq!(p["sessionId"], "s1");
        assert_eq!(p["videoType"], "screen");
        assert_eq!(p["width"], 640);
        assert_eq!(p["connection"]["connectionId"], "c1");
    }

    #[test]
    fn publisher_stream_carries_publisher_id() {
        let p = publisher_stream(&info(), "s1", "pub1");
        assert_eq!(p["publisherId"], "pub1");
    }

    #[test]
    fn subscriber_payload_merges_stream() {
        let p = subscriber(Some(json!({ "streamId": "st1" })), json!({ "reason": "quality" }));
        assert_eq!(p["reason"], "quality");
        assert_eq!(p["stream"]["streamId"], "st1");

        let bare = subscriber(None, json!({}));
        assert!(bare.get("stream").is_none());
    }
}
