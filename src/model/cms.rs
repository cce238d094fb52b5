//! CMS track payloads.
//!
//! The CMS hands tracks to the player in one of two shapes:
//!
//! - a JSON object, optionally URL-encoded into a `cmsData` query parameter
//! - individual query parameters (`trackName`, `audio_src`, `XR_src`, ...)
//!
//! Both are converted into a [`Track`]. A payload without an audio source is
//! not a track.

use serde::Deserialize;
use serde_json::Value;

use super::Track;
use crate::error::{Error, Result};

/// Raw CMS field names.
#[derive(Debug, Default, Deserialize)]
struct CmsPayload {
    #[serde(rename = "trackName")]
    track_name: Option<String>,
    #[serde(rename = "chapterTitle")]
    chapter_title: Option<String>,
    audio_src: Option<String>,
    #[serde(rename = "XR_src")]
    xr_src: Option<String>,
    #[serde(rename = "albumArt")]
    album_art: Option<String>,
    #[serde(rename = "trackOrder")]
    track_order: Option<Value>,
    #[serde(rename = "isXR")]
    is_xr: Option<Value>,
}

impl CmsPayload {
    fn into_track(self) -> Result<Track> {
        let audio_locator = non_empty(self.audio_src)
            .ok_or_else(|| Error::InvalidTrack("payload has no audio_src".to_string()))?;

        let video_locator = non_empty(self.xr_src);
        // Only an explicit `true` opts a track into XR
        let is_xr_capable = matches!(self.is_xr, Some(Value::Bool(true)))
            || matches!(&self.is_xr, Some(Value::String(s)) if s == "true");

        Ok(Track {
            title: non_empty(self.track_name).unwrap_or_else(|| "Unknown Track".to_string()),
            chapter: self.chapter_title.unwrap_or_default(),
            audio_locator,
            video_locator,
            album_art_locator: non_empty(self.album_art),
            order: self.track_order.as_ref().and_then(parse_order),
            is_xr_capable,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn parse_order(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Track {
    /// Build a track from a CMS JSON payload.
    pub fn from_cms_json(json: &str) -> Result<Track> {
        let payload: CmsPayload = serde_json::from_str(json)?;
        payload.into_track()
    }

    /// Build a track from a URL query string (with or without the leading `?`).
    ///
    /// A `cmsData` parameter takes precedence over individual fields.
    pub fn from_query(query: &str) -> Result<Track> {
        let params = parse_query(query)?;

        if let Some((_, cms_data)) = params.iter().find(|(k, _)| k == "cmsData") {
            return Track::from_cms_json(cms_data);
        }

        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        CmsPayload {
            track_name: get("trackName"),
            chapter_title: get("chapterTitle"),
            audio_src: get("audio_src"),
            xr_src: get("XR_src"),
            album_art: get("albumArt"),
            track_order: get("trackOrder").map(Value::String),
            is_xr: get("isXR").map(Value::String),
        }
        .into_track()
    }
}

/// Split and decode `application/x-www-form-urlencoded` pairs.
fn parse_query(query: &str) -> Result<Vec<(String, String)>> {
    let query = query.trim_start_matches('?');
    let mut params = Vec::new();

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.push((decode_component(key)?, decode_component(value)?));
    }

    Ok(params)
}

fn decode_component(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|e| Error::InvalidTrack(format!("bad query encoding: {}", e)))
}
