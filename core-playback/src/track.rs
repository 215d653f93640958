//! Track model shared by the queue, the engine and the sync client.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Artist reference carried by a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Album reference carried by a track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRef {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
}

/// Where the audio for a track comes from.
///
/// A track is either a library file or belongs to exactly one external
/// provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamSource {
    Library,
    Provider { provider: String, external_id: String },
}

impl StreamSource {
    /// Source type string sent when creating a segmented session.
    pub fn source_type(&self) -> &str {
        match self {
            StreamSource::Library => "library",
            StreamSource::Provider { provider, .. } => provider,
        }
    }
}

/// A playable track.
///
/// Tracks are immutable once they are placed in a queue; see [`SharedTrack`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: ArtistRef,
    #[serde(default)]
    pub album: AlbumRef,
    /// Duration in seconds; `0` when unknown.
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_source: Option<StreamSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_features: Option<Vec<f32>>,
}

/// Queue snapshot entry.
pub type SharedTrack = Arc<Track>;

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: ArtistRef {
                name: artist.into(),
                id: None,
            },
            album: AlbumRef {
                title: String::new(),
                cover: None,
            },
            duration: 0.0,
            stream_source: None,
            audio_features: None,
        }
    }

    pub fn with_artist_id(mut self, id: impl Into<String>) -> Self {
        self.artist.id = Some(id.into());
        self
    }

    pub fn with_album(mut self, title: impl Into<String>, cover: Option<String>) -> Self {
        self.album = AlbumRef {
            title: title.into(),
            cover,
        };
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = seconds;
        self
    }

    pub fn with_stream_source(mut self, source: StreamSource) -> Self {
        self.stream_source = Some(source);
        self
    }

    /// Key used to keep same-artist tracks apart when shuffling.
    ///
    /// Prefers the artist id, then the lower-cased artist name. Returns `None`
    /// when neither is known.
    pub fn artist_key(&self) -> Option<String> {
        if let Some(id) = self.artist.id.as_deref().filter(|id| !id.trim().is_empty()) {
            return Some(format!("id:{id}"));
        }
        let name = self.artist.name.trim();
        if name.is_empty() {
            None
        } else {
            Some(format!("name:{}", name.to_lowercase()))
        }
    }

    /// Known duration, if any.
    pub fn known_duration(&self) -> Option<f64> {
        (self.duration.is_finite() && self.duration > 0.0).then_some(self.duration)
    }
}
