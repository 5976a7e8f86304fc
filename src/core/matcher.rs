use crate::common::config::{MatchMetric, MatchingConfig};
use crate::common::{AttendanceError, Result};
use crate::core::recognizer::{cosine_similarity, euclidean_distance, Embedding};
use serde::Serialize;
use std::sync::{Arc, RwLock};

/// A registered face as held in memory for matching.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub student_id: String,
    pub name: String,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub student_id: String,
    pub name: String,
    /// Similarity for cosine, distance for euclidean
    pub score: f32,
}

/// In-memory copy of every student's embedding, so frames never hit the
/// database for matching. Rebuilt after registrations and deletions.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    /// Closest entry under the metric, returned only if it passes the threshold.
    pub fn best_match(&self, query: &[f32], config: &MatchingConfig) -> Option<Match> {
        let candidates = self
            .entries
            .iter()
            .filter(|entry| entry.embedding.len() == query.len());

        let best = match config.metric {
            MatchMetric::Cosine => candidates
                .map(|entry| (entry, cosine_similarity(query, &entry.embedding)))
                .max_by(|a, b| a.1.total_cmp(&b.1)),
            MatchMetric::Euclidean => candidates
                .map(|entry| (entry, euclidean_distance(query, &entry.embedding)))
                .min_by(|a, b| a.1.total_cmp(&b.1)),
        }?;

        if !passes(config, best.1) {
            tracing::trace!("Best candidate {} rejected with score {:.3}", best.0.student_id, best.1);
            return None;
        }

        Some(Match {
            student_id: best.0.student_id.clone(),
            name: best.0.name.clone(),
            score: best.1,
        })
    }
}

/// The gallery shared by the camera thread and HTTP handlers.
///
/// Readers take an `Arc` snapshot and drop the lock straight away, so the
/// lock is never held across recognition or while the store is locked.
/// Writers may replace it while holding the store lock.
#[derive(Debug, Default)]
pub struct SharedGallery {
    current: RwLock<Arc<Gallery>>,
}

impl SharedGallery {
    pub fn new(gallery: Gallery) -> Self {
        Self { current: RwLock::new(Arc::new(gallery)) }
    }

    pub fn snapshot(&self) -> Result<Arc<Gallery>> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| AttendanceError::Storage("gallery lock poisoned".to_string()))
    }

    pub fn replace(&self, gallery: Gallery) -> Result<()> {
        let mut guard = self
            .current
            .write()
            .map_err(|_| AttendanceError::Storage("gallery lock poisoned".to_string()))?;
        *guard = Arc::new(gallery);
        Ok(())
    }
}

fn passes(config: &MatchingConfig, score: f32) -> bool {
    match config.metric {
        MatchMetric::Cosine => score >= config.threshold,
        MatchMetric::Euclidean => score <= config.threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, embedding: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            student_id: id.to_string(),
            name: format!("Student {}", id),
            embedding,
        }
    }

    fn gallery() -> Gallery {
        Gallery::from_entries(vec![
            entry("S1", vec![1.0, 0.0, 0.0]),
            entry("S2", vec![0.0, 1.0, 0.0]),
            entry("S3", vec![0.6, 0.8]),
        ])
    }

    #[test]
    fn cosine_picks_most_similar_above_threshold() {
        let config = MatchingConfig { metric: MatchMetric::Cosine, threshold: 0.8 };
        let m = gallery().best_match(&[0.9, 0.1, 0.0], &config).unwrap();
        assert_eq!(m.student_id, "S1");
        assert_eq!(m.name, "Student S1");
        assert!(m.score > 0.9);
    }

    #[test]
    fn cosine_rejects_below_threshold() {
        let config = MatchingConfig { metric: MatchMetric::Cosine, threshold: 0.8 };
        assert!(gallery().best_match(&[0.7, 0.7, 0.0], &config).is_none());
    }

    #[test]
    fn euclidean_picks_nearest_within_tolerance() {
        let config = MatchingConfig { metric: MatchMetric::Euclidean, threshold: 0.6 };
        let m = gallery().best_match(&[0.1, 0.9, 0.0], &config).unwrap();
        assert_eq!(m.student_id, "S2");
        assert!(m.score < 0.2);

        assert!(gallery().best_match(&[0.5, 0.5, 0.7], &config).is_none());
    }

    #[test]
    fn snapshots_outlive_replacement() {
        let shared = SharedGallery::new(gallery());
        let before = shared.snapshot().unwrap();

        shared.replace(Gallery::default()).unwrap();

        assert_eq!(before.len(), 3);
        assert!(shared.snapshot().unwrap().is_empty());
    }

    #[test]
    fn mismatched_dimensions_are_skipped() {
        let config = MatchingConfig { metric: MatchMetric::Cosine, threshold: 0.5 };
        let m = gallery().best_match(&[0.6, 0.8], &config).unwrap();
        assert_eq!(m.student_id, "S3");
        assert!(gallery().best_match(&[1.0; 7], &config).is_none());
    }

    #[test]
    fn empty_gallery_never_matches() {
        let config = MatchingConfig::default();
        assert!(Gallery::default().best_match(&[1.0, 0.0], &config).is_none());
    }
}
