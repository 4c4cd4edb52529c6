use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Artist -> track -> duration string.
///
/// Used both for the user overrides and for the tracks whose duration could
/// not be found. An empty string means the duration is still unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackDurations(BTreeMap<String, BTreeMap<String, String>>);

impl TrackDurations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry only when it holds a non-empty value.
    pub fn get(&self, artist: &str, track: &str) -> Option<&str> {
        self.0
            .get(artist)
            .and_then(|tracks| tracks.get(track))
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn contains(&self, artist: &str, track: &str) -> bool {
        self.0
            .get(artist)
            .is_some_and(|tracks| tracks.contains_key(track))
    }

    /// Records a track with an empty duration. Returns false if it was already there.
    pub fn insert_unknown(&mut self, artist: &str, track: &str) -> bool {
        let tracks = self.0.entry(artist.to_string()).or_default();
        if tracks.contains_key(track) {
            return false;
        }
        tracks.insert(track.to_string(), String::new());
        true
    }

    pub fn insert(&mut self, artist: &str, track: &str, duration: &str) {
        self.0
            .entry(artist.to_string())
            .or_default()
            .insert(track.to_string(), duration.to_string());
    }

    /// Copies every entry of `other` over this one; `other` wins on conflicts.
    pub fn overlay(&mut self, other: &TrackDurations) {
        for (artist, tracks) in &other.0 {
            let entry = self.0.entry(artist.clone()).or_default();
            for (track, duration) in tracks {
                entry.insert(track.clone(), duration.clone());
            }
        }
    }

    /// Number of (artist, track) pairs.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
