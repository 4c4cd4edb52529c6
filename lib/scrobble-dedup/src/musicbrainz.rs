use async_trait::async_trait;
use musicbrainz_rs::{
    entity::{
        artist_credit::ArtistCredit,
        recording::{Recording, RecordingSearchQuery},
    },
    MusicBrainzClient, Search,
};
use shared::DurationCandidate;
use tracing::debug;

use crate::{
    error::{DedupError, Result},
    traits::MetadataProvider,
};

/// Joins the artist credits into a single, comma-separated string.
fn format_artist_credit(credits: &Option<Vec<ArtistCredit>>) -> String {
    credits
        .as_ref()
        .map(|credits| {
            credits
                .iter()
                .map(|credit| credit.name.clone())
                .collect::<Vec<String>>()
                .join(", ")
        })
        .unwrap_or_else(|| "Unknown Artist".to_string())
}

/// Recording search against the public MusicBrainz web service.
pub struct MusicBrainzProvider {
    client: MusicBrainzClient,
}

impl MusicBrainzProvider {
    pub fn new() -> Result<Self> {
        let version = env!("CARGO_PKG_VERSION");
        let client = MusicBrainzClient::new(&format!(
            "scrobble-dedup/{version} ( https://github.com/scrobble-dedup/scrobble-dedup )"
        ))
        .map_err(|e| DedupError::MusicBrainz(format!("invalid client configuration: {e:?}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MetadataProvider for MusicBrainzProvider {
    fn name(&self) -> &'static str {
        "MusicBrainz"
    }

    async fn search_recordings(&self, artist: &str, track: &str) -> Result<Vec<DurationCandidate>> {
        let mut recording_query = RecordingSearchQuery::query_builder();
        recording_query.artist_name(artist).and();
        let search_query = recording_query.recording(track).build();

        let results = Recording::search(search_query)
            .execute_with_client(&self.client)
            .await
            .map_err(|e| DedupError::MusicBrainz(format!("{e:?}")))?;

        debug!(artist, track, count = results.entities.len(), "MusicBrainz recording search");

        Ok(results
            .entities
            .into_iter()
            .map(|recording| DurationCandidate {
                artist: format_artist_credit(&recording.artist_credit),
                title: recording.title,
                duration_ms: recording.length,
            })
            .collect())
    }
}
