//! Last.fm API response types
//!
//! The API is loose about shapes: numbers arrive as strings, one-element
//! lists collapse to a bare object, and any field may be missing. Every
//! field here is optional with an explicit default so that a structurally
//! odd entry degrades instead of failing the whole page.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Placeholder for missing or malformed text fields
pub const UNKNOWN: &str = "Unknown";

/// `user.getRecentTracks` response envelope
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecentTracksResponse {
    #[serde(default)]
    pub recenttracks: Option<RecentTracks>,
    /// Present only on error payloads; any non-null value marks one
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: Option<String>,
}

impl RecentTracksResponse {
    /// `(code, message)` when the body is an error payload
    pub fn api_error(&self) -> Option<(i64, String)> {
        api_error(self.error.as_ref(), self.message.as_deref())
    }
}

/// `recenttracks` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecentTracks {
    #[serde(default)]
    pub track: TrackList,
    #[serde(rename = "@attr", default)]
    pub attr: RecentTracksAttr,
}

impl RecentTracks {
    /// Track entries in page order
    ///
    /// Non-object items are dropped.
    pub fn entries(&self) -> Vec<TrackEntry> {
        let items: &[Value] = match &self.track {
            TrackList::Many(items) => items,
            TrackList::One(item) => std::slice::from_ref(item),
        };

        items
            .iter()
            .filter(|item| item.is_object())
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect()
    }
}

/// Either an array of tracks or, for single-track pages, one bare object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TrackList {
    Many(Vec<Value>),
    One(Value),
}

impl Default for TrackList {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

/// Pagination attributes (`@attr`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecentTracksAttr {
    #[serde(rename = "totalPages", default, deserialize_with = "lenient_i64")]
    pub total_pages: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub page: Option<i64>,
    #[serde(rename = "perPage", default, deserialize_with = "lenient_i64")]
    pub per_page: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub total: Option<i64>,
    #[serde(default)]
    pub user: Option<String>,
}

/// One scrobble as delivered by the API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default)]
    pub artist: Option<TextField>,
    #[serde(default)]
    pub album: Option<TextField>,
    #[serde(default, deserialize_with = "lenient_object")]
    pub date: Option<TrackDate>,
    #[serde(rename = "@attr", default, deserialize_with = "lenient_object")]
    pub attr: Option<TrackAttr>,
}

impl TrackEntry {
    /// The track currently playing carries `@attr.nowplaying = "true"` and no date
    pub fn is_now_playing(&self) -> bool {
        self.attr
            .as_ref()
            .and_then(|a| a.nowplaying.as_deref())
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn artist_name(&self) -> String {
        text_or_unknown(self.artist.as_ref().and_then(TextField::text))
    }

    pub fn album_name(&self) -> String {
        text_or_unknown(self.album.as_ref().and_then(TextField::text))
    }

    pub fn track_name(&self) -> String {
        text_or_unknown(self.name.as_deref())
    }

    /// Unix timestamp of the scrobble, `None` when missing, unparseable or negative
    pub fn timestamp(&self) -> Option<i64> {
        self.date.as_ref().and_then(|d| d.uts).filter(|ts| *ts >= 0)
    }
}

fn text_or_unknown(text: Option<&str>) -> String {
    match text.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

/// `{"#text": "..."}` object used for artist and album
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextField {
    Object {
        #[serde(rename = "#text", default, deserialize_with = "lenient_string")]
        text: Option<String>,
    },
    Other(Value),
}

impl TextField {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Object { text } => text.as_deref(),
            Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackDate {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub uts: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackAttr {
    #[serde(default, deserialize_with = "lenient_string")]
    pub nowplaying: Option<String>,
}

/// `user.getInfo` response envelope
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfoResponse {
    #[serde(default)]
    pub user: Option<UserInfo>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: Option<String>,
}

impl UserInfoResponse {
    pub fn api_error(&self) -> Option<(i64, String)> {
        api_error(self.error.as_ref(), self.message.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub registered: Option<Registered>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registered {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub unixtime: Option<i64>,
}

/// Code used when an error payload carries no numeric code
pub const UNKNOWN_ERROR_CODE: i64 = -1;

/// Classify an `error` field: number, numeric string, free text or a
/// `{code, message}` object all count as an error payload
fn api_error(error: Option<&Value>, message: Option<&str>) -> Option<(i64, String)> {
    let error = error.filter(|e| !e.is_null())?;

    let (code, inline_message) = match error {
        Value::Number(n) => (n.as_i64(), None),
        Value::String(s) => match s.trim().parse() {
            Ok(code) => (Some(code), None),
            Err(_) => (None, Some(s.clone())),
        },
        Value::Object(obj) => (
            obj.get("code").and_then(value_as_i64),
            obj.get("message").and_then(Value::as_str).map(str::to_string),
        ),
        _ => (None, None),
    };

    let message = message
        .map(str::to_string)
        .or(inline_message)
        .unwrap_or_else(|| "Unknown error".to_string());
    Some((code.unwrap_or(UNKNOWN_ERROR_CODE), message))
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Deserialize `T` from a JSON object; any other shape becomes `None`
fn lenient_object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(obj @ Value::Object(_)) => serde_json::from_value(obj).ok(),
        _ => None,
    })
}

/// Accept a JSON number or a numeric string; anything else becomes `None`
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_i64))
}

/// Accept a JSON string; anything else becomes `None`
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}
