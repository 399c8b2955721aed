//! Validation of loosely-typed host configuration.
//!
//! Every operation that accepts an options object runs it through an
//! allowed-keys table first. Unknown keys are reported and dropped, known
//! keys are coerced to their declared type (mismatches fall back to the
//! type's zero value), and only then is the typed record built.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ValidationError;
use crate::model::{CameraPosition, Transformer, VideoContentHint, VideoDimensions};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlatformFamily {
    #[default]
    Ios,
    Android,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    Boolean,
    String,
    Number,
    Object,
    Array,
    /// Accepted as-is; the typed pass decides what to make of it.
    Any,
}

pub type AllowedKeys = &'static [(&'static str, OptionType)];

/// A sanitized value plus the diagnostics raised while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized<T> {
    pub value: T,
    pub diagnostics: Vec<ValidationError>,
}

const IOS_SESSION_KEYS: AllowedKeys = &[
    ("connectionEventsSuppressed", OptionType::Boolean),
    ("ipWhitelist", OptionType::Boolean),
    ("iceConfig", OptionType::Object),
    ("proxyUrl", OptionType::String),
    ("enableStereoOutput", OptionType::Boolean),
    ("enableSinglePeerConnection", OptionType::Boolean),
    ("sessionMigration", OptionType::Boolean),
];

const ANDROID_SESSION_KEYS: AllowedKeys = &[
    ("connectionEventsSuppressed", OptionType::Boolean),
    ("useTextureViews", OptionType::Boolean),
    ("androidOnTop", OptionType::String),
    ("androidZOrder", OptionType::String),
    ("ipWhitelist", OptionType::Boolean),
    ("iceConfig", OptionType::Object),
    ("proxyUrl", OptionType::String),
    ("enableStereoOutput", OptionType::Boolean),
    ("enableSinglePeerConnection", OptionType::Boolean),
    ("sessionMigration", OptionType::Boolean),
];

const ICE_CONFIG_KEYS: AllowedKeys = &[
    ("includeServers", OptionType::String),
    ("transportPolicy", OptionType::String),
    ("filterOutLanCandidates", OptionType::Boolean),
    ("customServers", OptionType::Array),
];

const IOS_PUBLISHER_KEYS: AllowedKeys = &[
    ("name", OptionType::String),
    ("audioTrack", OptionType::Boolean),
    ("videoTrack", OptionType::Boolean),
    ("publishAudio", OptionType::Boolean),
    ("publishVideo", OptionType::Boolean),
    ("publishCaptions", OptionType::Boolean),
    ("audioBitrate", OptionType::Number),
    ("frameRate", OptionType::Number),
    ("resolution", OptionType::String),
    ("enableDtx", OptionType::Boolean),
    ("audioFallbackEnabled", OptionType::Boolean),
    ("publisherAudioFallback", OptionType::Boolean),
    ("subscriberAudioFallback", OptionType::Boolean),
    ("videoSource", OptionType::String),
    ("scalableScreenshare", OptionType::Boolean),
    ("cameraPosition", OptionType::String),
    ("cameraTorch", OptionType::Boolean),
    ("cameraZoomFactor", OptionType::Number),
    ("videoContentHint", OptionType::String),
];

const ANDROID_PUBLISHER_KEYS: AllowedKeys = &[
    ("name", OptionType::String),
    ("audioTrack", OptionType::Boolean),
    ("videoTrack", OptionType::Boolean),
    ("publishAudio", OptionType::Boolean),
    ("publishVideo", OptionType::Boolean),
    ("publishCaptions", OptionType::Boolean),
    ("audioBitrate", OptionType::Number),
    ("frameRate", OptionType::Number),
    ("resolution", OptionType::String),
    ("enableDtx", OptionType::Boolean),
    ("audioFallbackEnabled", OptionType::Boolean),
    ("publisherAudioFallback", OptionType::Boolean),
    ("subscriberAudioFallback", OptionType::Boolean),
    ("videoSource", OptionType::String),
    ("scalableScreenshare", OptionType::Boolean),
    ("cameraPosition", OptionType::String),
    ("cameraTorch", OptionType::Boolean),
    ("cameraZoomFactor", OptionType::Number),
    ("videoContentHint", OptionType::String),
    ("maxVideoBitrate", OptionType::Number),
    ("videoBitratePreset", OptionType::String),
    ("allowAudioCaptureWhileMuted", OptionType::Boolean),
];

const SUBSCRIBER_KEYS: AllowedKeys = &[
    ("subscribeToAudio", OptionType::Boolean),
    ("subscribeToVideo", OptionType::Boolean),
    ("subscribeToCaptions", OptionType::Boolean),
    ("preferredResolution", OptionType::Any),
    ("preferredFrameRate", OptionType::Number),
    ("audioVolume", OptionType::Number),
];

pub fn session_keys(platform: PlatformFamily) -> AllowedKeys {
    match platform {
        PlatformFamily::Ios => IOS_SESSION_KEYS,
        PlatformFamily::Android => ANDROID_SESSION_KEYS,
    }
}

pub fn publisher_keys(platform: PlatformFamily) -> AllowedKeys {
    match platform {
        PlatformFamily::Ios => IOS_PUBLISHER_KEYS,
        PlatformFamily::Android => ANDROID_PUBLISHER_KEYS,
    }
}

/// Filter `value` through `allowed`.
///
/// A non-object input yields an empty map and no diagnostics; the typed
/// builders then fall back to their defaults.
pub fn sanitize(value: &Value, allowed: AllowedKeys) -> Sanitized<Map<String, Value>> {
    let mut fields = Map::new();
    let mut diagnostics = Vec::new();

    let Some(object) = value.as_object() else {
        return Sanitized { value: fields, diagnostics };
    };

    for (key, raw) in object {
        match allowed.iter().find(|(name, _)| name == key) {
            Some((_, ty)) => {
                fields.insert(key.clone(), coerce(raw, *ty));
            }
            None => {
                tracing::warn!(key = %key, "ignoring unknown option");
                diagnostics.push(ValidationError::unknown_key(key));
            }
        }
    }

    Sanitized { value: fields, diagnostics }
}

fn coerce(value: &Value, ty: OptionType) -> Value {
    let matches = match ty {
        OptionType::Boolean => value.is_boolean(),
        OptionType::String => value.is_string(),
        OptionType::Number => value.is_number(),
        OptionType::Object => value.is_object(),
        OptionType::Array => value.is_array(),
        OptionType::Any => true,
    };
    if matches {
        return value.clone();
    }
    match ty {
        OptionType::Boolean => Value::Bool(false),
        OptionType::String => Value::String(String::new()),
        OptionType::Number => Value::from(0),
        OptionType::Object => Value::Object(Map::new()),
        OptionType::Array => Value::Array(Vec::new()),
        OptionType::Any => Value::Null,
    }
}

fn bool_or(fields: &Map<String, Value>, key: &str, default: bool) -> bool {
    fields.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn string_or(fields: &Map<String, Value>, key: &str, default: &str) -> String {
    fields
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn positive_f64(fields: &Map<String, Value>, key: &str) -> Option<f64> {
    fields
        .get(key)
        .and_then(Value::as_f64)
        .filter(|v| *v > 0.0)
}

fn positive_u32(fields: &Map<String, Value>, key: &str) -> Option<u32> {
    positive_f64(fields, key).map(|v| v.min(u32::MAX as f64) as u32)
}

// ── Session options ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IncludeServers {
    #[default]
    All,
    Custom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportPolicy {
    #[default]
    All,
    Relay,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceConfig {
    pub include_servers: IncludeServers,
    pub transport_policy: TransportPolicy,
    pub filter_out_lan_candidates: bool,
    pub custom_servers: Vec<IceServer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    pub connection_events_suppressed: bool,
    pub ip_whitelist: bool,
    pub proxy_url: String,
    pub enable_stereo_output: bool,
    pub enable_single_peer_connection: bool,
    pub session_migration: bool,
    pub use_texture_views: bool,
    pub android_on_top: String,
    pub android_z_order: String,
    pub ice_config: IceConfig,
}

pub fn sanitize_session_options(value: &Value, platform: PlatformFamily) -> Sanitized<SessionOptions> {
    let Sanitized { value: fields, mut diagnostics } = sanitize(value, session_keys(platform));

    let ice_config = match fields.get("iceConfig") {
        Some(raw) => {
            let ice = sanitize_ice_config(raw);
            diagnostics.extend(ice.diagnostics);
            ice.value
        }
        None => IceConfig::default(),
    };

    let options = SessionOptions {
        connection_events_suppressed: bool_or(&fields, "connectionEventsSuppressed", false),
        ip_whitelist: bool_or(&fields, "ipWhitelist", false),
        proxy_url: string_or(&fields, "proxyUrl", ""),
        enable_stereo_output: bool_or(&fields, "enableStereoOutput", false),
        enable_single_peer_connection: bool_or(&fields, "enableSinglePeerConnection", false),
        session_migration: bool_or(&fields, "sessionMigration", false),
        use_texture_views: bool_or(&fields, "useTextureViews", false),
        android_on_top: string_or(&fields, "androidOnTop", ""),
        android_z_order: string_or(&fields, "androidZOrder", ""),
        ice_config,
    };

    Sanitized { value: options, diagnostics }
}

/// Secondary pass over the nested ICE/TURN override object.
pub fn sanitize_ice_config(value: &Value) -> Sanitized<IceConfig> {
    let Sanitized { value: fields, mut diagnostics } = sanitize(value, ICE_CONFIG_KEYS);

    let include_servers = match fields.get("includeServers").and_then(Value::as_str) {
        Some("custom") => IncludeServers::Custom,
        _ => IncludeServers::All,
    };
    let transport_policy = match fields.get("transportPolicy").and_then(Value::as_str) {
        Some("relay") => TransportPolicy::Relay,
        _ => TransportPolicy::All,
    };

    let mut custom_servers = Vec::new();
    if let Some(entries) = fields.get("customServers").and_then(Value::as_array) {
        for (index, entry) in entries.iter().enumerate() {
            match sanitize_ice_server(entry, index, &mut diagnostics) {
                Some(server) => custom_servers.push(server),
                None => continue,
            }
        }
    }

    let config = IceConfig {
        include_servers,
        transport_policy,
        filter_out_lan_candidates: bool_or(&fields, "filterOutLanCandidates", false),
        custom_servers,
    };
    Sanitized { value: config, diagnostics }
}

fn sanitize_ice_server(
    entry: &Value,
    index: usize,
    diagnostics: &mut Vec<ValidationError>,
) -> Option<IceServer> {
    let slot = format!("customServers[{index}]");
    let Some(object) = entry.as_object() else {
        diagnostics.push(ValidationError {
            key: slot,
            message: "ICE server entry must be an object".into(),
        });
        return None;
    };

    let mut server = IceServer::default();
    for (key, value) in object {
        match key.as_str() {
            "urls" => {
                server.urls = match value {
                    Value::String(url) => vec![url.clone()],
                    Value::Array(urls) => urls
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect(),
                    _ => Vec::new(),
                };
            }
            "username" => server.username = value.as_str().unwrap_or_default().to_string(),
            "credential" => server.credential = value.as_str().unwrap_or_default().to_string(),
            other => diagnostics.push(ValidationError::unknown_key(&format!("{slot}.{other}"))),
        }
    }

    if server.urls.is_empty() {
        diagnostics.push(ValidationError {
            key: slot,
            message: "ICE server entry has no urls".into(),
        });
        return None;
    }
    Some(server)
}

// ── Publisher settings ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraResolution {
    #[serde(rename = "LOW")]
    Low,
    #[default]
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "HIGH_1080P")]
    High1080p,
}

impl CameraResolution {
    pub fn parse(value: &str) -> Self {
        match value {
            "LOW" => CameraResolution::Low,
            "HIGH" => CameraResolution::High,
            "HIGH_1080P" => CameraResolution::High1080p,
            _ => CameraResolution::Medium,
        }
    }
}

/// Camera frame rates the engine accepts; anything else snaps to 30.
pub fn snap_frame_rate(requested: Option<f64>) -> u32 {
    match requested.map(|v| v as u32) {
        Some(rate @ (30 | 15 | 7 | 1)) => rate,
        _ => 30,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoSource {
    #[default]
    Camera,
    Screen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherSettings {
    pub name: String,
    pub audio_track: bool,
    pub video_track: bool,
    pub publish_audio: bool,
    pub publish_video: bool,
    pub publish_captions: bool,
    pub audio_bitrate: Option<u32>,
    pub frame_rate: u32,
    pub resolution: CameraResolution,
    pub enable_dtx: bool,
    pub audio_fallback_enabled: bool,
    pub publisher_audio_fallback: bool,
    pub subscriber_audio_fallback: bool,
    pub video_source: VideoSource,
    pub scalable_screenshare: bool,
    pub camera_position: CameraPosition,
    pub camera_torch: bool,
    pub camera_zoom_factor: Option<f32>,
    pub video_content_hint: VideoContentHint,
    pub max_video_bitrate: Option<u32>,
    pub video_bitrate_preset: String,
    pub allow_audio_capture_while_muted: bool,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            audio_track: true,
            video_track: true,
            publish_audio: true,
            publish_video: true,
            publish_captions: false,
            audio_bitrate: None,
            frame_rate: 30,
            resolution: CameraResolution::Medium,
            enable_dtx: false,
            audio_fallback_enabled: true,
            publisher_audio_fallback: false,
            subscriber_audio_fallback: false,
            video_source: VideoSource::Camera,
            scalable_screenshare: false,
            camera_position: CameraPosition::Front,
            camera_torch: false,
            camera_zoom_factor: None,
            video_content_hint: VideoContentHint::None,
            max_video_bitrate: None,
            video_bitrate_preset: String::new(),
            allow_audio_capture_while_muted: false,
        }
    }
}

pub fn sanitize_publisher_settings(value: &Value, platform: PlatformFamily) -> Sanitized<PublisherSettings> {
    let Sanitized { value: fields, diagnostics } = sanitize(value, publisher_keys(platform));
    let defaults = PublisherSettings::default();

    let video_source = match fields.get("videoSource").and_then(Value::as_str) {
        Some("screen") => VideoSource::Screen,
        _ => VideoSource::Camera,
    };
    let camera_position = fields
        .get("cameraPosition")
        .and_then(Value::as_str)
        .map(CameraPosition::parse)
        .unwrap_or(defaults.camera_position);

    let settings = PublisherSettings {
        name: string_or(&fields, "name", ""),
        audio_track: bool_or(&fields, "audioTrack", defaults.audio_track),
        video_track: bool_or(&fields, "videoTrack", defaults.video_track),
        publish_audio: bool_or(&fields, "publishAudio", defaults.publish_audio),
        publish_video: bool_or(&fields, "publishVideo", defaults.publish_video),
        publish_captions: bool_or(&fields, "publishCaptions", defaults.publish_captions),
        audio_bitrate: positive_u32(&fields, "audioBitrate"),
        frame_rate: snap_frame_rate(fields.get("frameRate").and_then(Value::as_f64)),
        resolution: CameraResolution::parse(&string_or(&fields, "resolution", "MEDIUM")),
        enable_dtx: bool_or(&fields, "enableDtx", defaults.enable_dtx),
        audio_fallback_enabled: bool_or(&fields, "audioFallbackEnabled", defaults.audio_fallback_enabled),
        publisher_audio_fallback: bool_or(&fields, "publisherAudioFallback", defaults.publisher_audio_fallback),
        subscriber_audio_fallback: bool_or(&fields, "subscriberAudioFallback", defaults.subscriber_audio_fallback),
        video_source,
        scalable_screenshare: bool_or(&fields, "scalableScreenshare", defaults.scalable_screenshare),
        camera_position,
        camera_torch: bool_or(&fields, "cameraTorch", defaults.camera_torch),
        camera_zoom_factor: positive_f64(&fields, "cameraZoomFactor").map(|v| v as f32),
        video_content_hint: VideoContentHint::parse(&string_or(&fields, "videoContentHint", "")),
        max_video_bitrate: positive_u32(&fields, "maxVideoBitrate"),
        video_bitrate_preset: string_or(&fields, "videoBitratePreset", ""),
        allow_audio_capture_while_muted: bool_or(
            &fields,
            "allowAudioCaptureWhileMuted",
            defaults.allow_audio_capture_while_muted,
        ),
    };

    Sanitized { value: settings, diagnostics }
}

// ── Subscriber settings ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberSettings {
    pub subscribe_to_audio: bool,
    pub subscribe_to_video: bool,
    pub subscribe_to_captions: bool,
    pub preferred_resolution: Option<VideoDimensions>,
    pub preferred_frame_rate: Option<f32>,
    pub audio_volume: Option<f64>,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            subscribe_to_audio: true,
            subscribe_to_video: true,
            subscribe_to_captions: false,
            preferred_resolution: None,
            preferred_frame_rate: None,
            audio_volume: None,
        }
    }
}

pub fn sanitize_subscriber_settings(value: &Value) -> Sanitized<SubscriberSettings> {
    let Sanitized { value: fields, diagnostics } = sanitize(value, SUBSCRIBER_KEYS);
    let defaults = SubscriberSettings::default();

    let settings = SubscriberSettings {
        subscribe_to_audio: bool_or(&fields, "subscribeToAudio", defaults.subscribe_to_audio),
        subscribe_to_video: bool_or(&fields, "subscribeToVideo", defaults.subscribe_to_video),
        subscribe_to_captions: bool_or(&fields, "subscribeToCaptions", defaults.subscribe_to_captions),
        preferred_resolution: fields.get("preferredResolution").and_then(parse_preferred_resolution),
        preferred_frame_rate: parse_preferred_frame_rate(fields.get("preferredFrameRate")),
        audio_volume: fields
            .get("audioVolume")
            .and_then(Value::as_f64)
            .filter(|v| *v >= 0.0),
    };

    Sanitized { value: settings, diagnostics }
}

/// Accepts `{ "width": w, "height": h }` or `"WxH"`. Anything else means
/// "no preference".
pub fn parse_preferred_resolution(value: &Value) -> Option<VideoDimensions> {
    let (width, height) = match value {
        Value::Object(map) => (
            map.get("width").and_then(Value::as_u64)?,
            map.get("height").and_then(Value::as_u64)?,
        ),
        Value::String(text) => {
            let (w, h) = text.split_once('x')?;
            (w.trim().parse().ok()?, h.trim().parse().ok()?)
        }
        _ => return None,
    };
    if width == 0 || height == 0 {
        return None;
    }
    Some(VideoDimensions {
        width: u32::try_from(width).ok()?,
        height: u32::try_from(height).ok()?,
    })
}

pub fn parse_preferred_frame_rate(value: Option<&Value>) -> Option<f32> {
    value
        .and_then(Value::as_f64)
        .filter(|v| *v > 0.0)
        .map(|v| v as f32)
}

// ── Transformer chains ───────────────────────────────────────────────

/// Each entry must be `{ "name": string, "properties": string }`; malformed
/// entries are dropped with a diagnostic and the rest are kept in order.
pub fn sanitize_transformers(value: &Value) -> Sanitized<Vec<Transformer>> {
    let mut transformers = Vec::new();
    let mut diagnostics = Vec::new();

    let Some(entries) = value.as_array() else {
        diagnostics.push(ValidationError {
            key: "transformers".into(),
            message: "expected an array of transformers".into(),
        });
        return Sanitized { value: transformers, diagnostics };
    };

    for (index, entry) in entries.iter().enumerate() {
        let name = entry.get("name").and_then(Value::as_str);
        let properties = entry.get("properties").and_then(Value::as_str);
        match (name, properties) {
            (Some(name), Some(properties)) if !name.is_empty() => transformers.push(Transformer {
                name: name.to_string(),
                properties: properties.to_string(),
            }),
            _ => {
                tracing::warn!(index, "dropping malformed transformer entry");
                diagnostics.push(ValidationError {
                    key: format!("transformers[{index}]"),
                    message: "transformer needs string name and properties".into(),
                });
            }
        }
    }

    Sanitized { value: transformers, diagnostics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_key_is_dropped_and_reported() {
        let out = sanitize(&json!({ "foo": 1, "proxyUrl": "http://x" }), IOS_SESSION_KEYS);
        assert_eq!(out.value.len(), 1);
        assert_eq!(out.value["proxyUrl"], json!("http://x"));
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].key, "foo");
    }

    #[test]
    fn session_options_keep_recognized_fields() {
        let out = sanitize_session_options(&json!({ "foo": 1, "proxyUrl": "http://x" }), PlatformFamily::Ios);
        assert_eq!(out.value.proxy_url, "http://x");
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(
            SessionOptions { proxy_url: String::new(), ..out.value },
            SessionOptions::default()
        );
    }

    #[test]
    fn mistyped_values_fall_back_to_type_defaults() {
        let out = sanitize(
            &json!({ "ipWhitelist": "yes", "proxyUrl": 42, "iceConfig": [1, 2] }),
            IOS_SESSION_KEYS,
        );
        assert!(out.diagnostics.is_empty());
        assert_eq!(out.value["ipWhitelist"], json!(false));
        assert_eq!(out.value["proxyUrl"], json!(""));
        assert_eq!(out.value["iceConfig"], json!({}));
    }

    #[test]
    fn non_object_input_yields_defaults() {
        let out = sanitize_session_options(&json!("nonsense"), PlatformFamily::Android);
        assert_eq!(out.value, SessionOptions::default());
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn android_only_keys_are_rejected_on_ios() {
        let options = json!({ "useTextureViews": true, "androidZOrder": "onTop" });

        let ios = sanitize_session_options(&options, PlatformFamily::Ios);
        assert_eq!(ios.diagnostics.len(), 2);
        assert!(!ios.value.use_texture_views);

        let android = sanitize_session_options(&options, PlatformFamily::Android);
        assert!(android.diagnostics.is_empty());
        assert!(android.value.use_texture_views);
        assert_eq!(android.value.android_z_order, "onTop");
    }

    #[test]
    fn ice_config_gets_its_own_pass() {
        let options = json!({
            "iceConfig": {
                "includeServers": "custom",
                "transportPolicy": "relay",
                "filterOutLanCandidates": true,
                "customServers": [
                    { "urls": ["turn:a.example:3478"], "username": "u", "credential": "c" },
                    { "urls": "stun:b.example" },
                    "bogus",
                    { "username": "no-urls" }
                ],
                "nope": 1
            }
        });
        let out = sanitize_session_options(&options, PlatformFamily::Ios);
        let ice = &out.value.ice_config;
        assert_eq!(ice.include_servers, IncludeServers::Custom);
        assert_eq!(ice.transport_policy, TransportPolicy::Relay);
        assert!(ice.filter_out_lan_candidates);
        assert_eq!(ice.custom_servers.len(), 2);
        assert_eq!(ice.custom_servers[1].urls, vec!["stun:b.example".to_string()]);
        let keys: Vec<_> = out.diagnostics.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["nope", "customServers[2]", "customServers[3]"]);
    }

    #[test]
    fn publisher_defaults_apply_only_when_absent() {
        let absent = sanitize_publisher_settings(&json!({}), PlatformFamily::Ios);
        assert!(absent.value.publish_audio);
        assert_eq!(absent.value.frame_rate, 30);

        let mistyped = sanitize_publisher_settings(&json!({ "publishAudio": "no" }), PlatformFamily::Ios);
        assert!(!mistyped.value.publish_audio);
    }

    #[test]
    fn publisher_frame_rate_and_resolution_are_normalized() {
        let out = sanitize_publisher_settings(
            &json!({ "frameRate": 15, "resolution": "HIGH_1080P", "cameraPosition": "back" }),
            PlatformFamily::Android,
        );
        assert_eq!(out.value.frame_rate, 15);
        assert_eq!(out.value.resolution, CameraResolution::High1080p);
        assert_eq!(out.value.camera_position, CameraPosition::Back);

        let odd = sanitize_publisher_settings(&json!({ "frameRate": 24 }), PlatformFamily::Ios);
        assert_eq!(odd.value.frame_rate, 30);
    }

    #[test]
    fn subscriber_preferences() {
        let out = sanitize_subscriber_settings(&json!({
            "subscribeToVideo": false,
            "preferredResolution": "640x480",
            "preferredFrameRate": 15,
            "audioVolume": 50
        }));
        assert!(out.value.subscribe_to_audio);
        assert!(!out.value.subscribe_to_video);
        assert_eq!(out.value.preferred_resolution, Some(VideoDimensions { width: 640, height: 480 }));
        assert_eq!(out.value.preferred_frame_rate, Some(15.0));
        assert_eq!(out.value.audio_volume, Some(50.0));
    }

    #[test]
    fn preferred_resolution_shapes() {
        assert_eq!(
            parse_preferred_resolution(&json!({ "width": 320, "height": 240 })),
            Some(VideoDimensions { width: 320, height: 240 })
        );
        assert_eq!(parse_preferred_resolution(&json!("0x240")), None);
        assert_eq!(parse_preferred_resolution(&json!(true)), None);
    }

    #[test]
    fn transformers_skip_malformed_entries() {
        let out = sanitize_transformers(&json!([
            { "name": "BackgroundBlur", "properties": "{\"radius\":\"High\"}" },
            { "name": "NoProps" },
            42
        ]));
        assert_eq!(out.value.len(), 1);
        assert_eq!(out.value[0].name, "BackgroundBlur");
        assert_eq!(out.diagnostics.len(), 2);
    }
}
