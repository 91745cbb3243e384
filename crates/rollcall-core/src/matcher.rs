//! 1:N identity matching over an enrolled snapshot.

use std::sync::{Arc, RwLock};

use crate::config::MatchConfig;
use crate::types::{Embedding, EnrolledIdentity, MatchResult};

/// What a comparison is for; each purpose has its own acceptance threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPurpose {
    /// Enrollment-time check that a new face is not already registered.
    DuplicateCheck,
    /// Check-in/out identification.
    Attendance,
}

impl MatchPurpose {
    pub fn threshold(&self, config: &MatchConfig) -> f32 {
        match self {
            MatchPurpose::DuplicateCheck => config.duplicate_threshold,
            MatchPurpose::Attendance => config.attendance_threshold,
        }
    }
}

/// Trait for comparing a probe embedding against an enrolled set.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        identities: &[EnrolledIdentity],
        threshold: f32,
    ) -> MatchResult;
}

/// Linear scan by cosine similarity. Ties keep the first identity seen.
///
/// The running maximum starts at 0.0, so an identity only becomes the best
/// candidate with positive similarity and the reported score never goes
/// negative.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        identities: &[EnrolledIdentity],
        threshold: f32,
    ) -> MatchResult {
        let mut best: Option<&EnrolledIdentity> = None;
        let mut best_similarity = 0.0f32;

        for identity in identities {
            if identity.embedding.dim() != probe.dim() {
                tracing::warn!(
                    identity = %identity.id,
                    expected = probe.dim(),
                    got = identity.embedding.dim(),
                    "skipping enrolled embedding with mismatched dimension"
                );
                continue;
            }
            let similarity = cosine_similarity(&probe.values, &identity.embedding.values);
            if similarity > best_similarity {
                best = Some(identity);
                best_similarity = similarity;
            }
        }

        match best {
            Some(identity) if best_similarity >= threshold => MatchResult {
                identity: Some(identity.clone()),
                similarity: best_similarity,
                decided: true,
            },
            _ => MatchResult::no_match(best_similarity),
        }
    }
}

/// Cosine similarity of two vectors. Zero when either has zero magnitude or
/// the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Immutable enrolled set, tagged with the version it was loaded as.
#[derive(Debug, Default)]
pub struct GallerySnapshot {
    pub version: u64,
    pub identities: Vec<EnrolledIdentity>,
}

/// Shared enrolled set. Readers bind to one snapshot for a whole match;
/// `replace` swaps in a new one atomically.
#[derive(Debug, Default)]
pub struct IdentityGallery {
    current: RwLock<Arc<GallerySnapshot>>,
}

impl IdentityGallery {
    pub fn new(identities: Vec<EnrolledIdentity>) -> Self {
        Self {
            current: RwLock::new(Arc::new(GallerySnapshot {
                version: 1,
                identities,
            })),
        }
    }

    pub fn snapshot(&self) -> Arc<GallerySnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Install a new enrolled set and return its version.
    pub fn replace(&self, identities: Vec<EnrolledIdentity>) -> u64 {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let version = guard.version + 1;
        *guard = Arc::new(GallerySnapshot {
            version,
            identities,
        });
        tracing::info!(version, count = guard.identities.len(), "identity gallery replaced");
        version
    }

    /// Identify `probe` against the current snapshot for `purpose`.
    pub fn identify(
        &self,
        matcher: &dyn Matcher,
        probe: &Embedding,
        purpose: MatchPurpose,
        config: &MatchConfig,
    ) -> MatchResult {
        let snapshot = self.snapshot();
        matcher.compare(probe, &snapshot.identities, purpose.threshold(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding {
            values,
            model_version: None,
        }
    }

    fn identity(id: &str, values: Vec<f32>) -> EnrolledIdentity {
        EnrolledIdentity {
            id: id.to_string(),
            display_name: format!("Person {id}"),
            embedding: emb(values),
        }
    }

    /// Unit vector in the (x, y) plane with cosine `c` to the x axis.
    fn at_cosine(c: f32) -> Vec<f32> {
        vec![c, (1.0 - c * c).sqrt(), 0.0]
    }

    #[test]
    fn test_cosine_self_similarity_and_symmetry() {
        let a = vec![0.3, -0.2, 0.9, 0.1];
        let b = vec![0.5, 0.4, -0.1, 0.7];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < 1e-7);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_cosine_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-7);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-7);
    }

    #[test]
    fn test_empty_set_not_decided() {
        let result = CosineMatcher.compare(&emb(vec![1.0, 0.0, 0.0]), &[], 0.8);
        assert!(!result.decided);
        assert!(result.identity.is_none());
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_single_identity_above_and_below_threshold() {
        let probe = emb(vec![1.0, 0.0, 0.0]);
        let set = vec![identity("a", at_cosine(0.85))];

        let hit = CosineMatcher.compare(&probe, &set, 0.80);
        assert!(hit.decided);
        assert_eq!(hit.identity.as_ref().map(|i| i.id.as_str()), Some("a"));
        assert!((hit.similarity - 0.85).abs() < 1e-5);

        let miss = CosineMatcher.compare(&probe, &set, 0.90);
        assert!(!miss.decided);
        assert!(miss.identity.is_none());
        assert!((miss.similarity - 0.85).abs() < 1e-5);
    }

    #[test]
    fn test_identical_enrolled_embedding_matches_fully() {
        let probe = emb(vec![0.2, -0.4, 0.8, 0.4]);
        let set = vec![identity("a", probe.values.clone())];
        let result = CosineMatcher.compare(&probe, &set, 0.80);
        assert!(result.decided);
        assert_eq!(result.identity.map(|i| i.id), Some("a".to_string()));
        assert!((result.similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_negative_similarity_not_reported() {
        let probe = emb(vec![1.0, 0.0, 0.0]);
        let set = vec![identity("opposite", vec![-1.0, 0.0, 0.0]), identity("away", at_cosine(-0.5))];
        let result = CosineMatcher.compare(&probe, &set, 0.80);
        assert!(!result.decided);
        assert!(result.identity.is_none());
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_best_of_two_wins() {
        let probe = emb(vec![1.0, 0.0, 0.0]);
        let set = vec![identity("a", at_cosine(0.82)), identity("b", at_cosine(0.80))];
        let result = CosineMatcher.compare(&probe, &set, 0.80);
        assert!(result.decided);
        assert_eq!(result.identity.map(|i| i.id), Some("a".to_string()));
        assert!((result.similarity - 0.82).abs() < 1e-5);

        // Order does not matter for a strict winner.
        let reversed = vec![identity("b", at_cosine(0.80)), identity("a", at_cosine(0.82))];
        let result = CosineMatcher.compare(&probe, &reversed, 0.80);
        assert_eq!(result.identity.map(|i| i.id), Some("a".to_string()));
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let probe = emb(vec![1.0, 0.0, 0.0]);
        let set = vec![identity("first", at_cosine(0.9)), identity("second", at_cosine(0.9))];
        let result = CosineMatcher.compare(&probe, &set, 0.8);
        assert_eq!(result.identity.map(|i| i.id), Some("first".to_string()));
    }

    #[test]
    fn test_mismatched_dimension_skipped() {
        let probe = emb(vec![1.0, 0.0, 0.0]);
        let set = vec![
            identity("short", vec![1.0, 0.0]),
            identity("ok", at_cosine(0.81)),
        ];
        let result = CosineMatcher.compare(&probe, &set, 0.80);
        assert_eq!(result.identity.map(|i| i.id), Some("ok".to_string()));

        let only_bad = vec![identity("short", vec![1.0, 0.0])];
        let result = CosineMatcher.compare(&probe, &only_bad, 0.0);
        assert!(!result.decided);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_purpose_thresholds() {
        let cfg = MatchConfig::default();
        assert_eq!(MatchPurpose::DuplicateCheck.threshold(&cfg), 0.70);
        assert_eq!(MatchPurpose::Attendance.threshold(&cfg), 0.80);

        // 0.75 is a duplicate but not an attendance match.
        let gallery = IdentityGallery::new(vec![identity("a", at_cosine(0.75))]);
        let probe = emb(vec![1.0, 0.0, 0.0]);
        assert!(gallery.identify(&CosineMatcher, &probe, MatchPurpose::DuplicateCheck, &cfg).decided);
        assert!(!gallery.identify(&CosineMatcher, &probe, MatchPurpose::Attendance, &cfg).decided);
    }

    #[test]
    fn test_gallery_replace_is_atomic_for_held_snapshots() {
        let gallery = IdentityGallery::new(vec![identity("a", at_cosine(1.0))]);
        let held = gallery.snapshot();
        assert_eq!(held.version, 1);

        let version = gallery.replace(vec![identity("b", at_cosine(1.0)), identity("c", at_cosine(0.5))]);
        assert_eq!(version, 2);

        // The earlier snapshot is unaffected; new readers see the new set.
        assert_eq!(held.identities.len(), 1);
        assert_eq!(held.identities[0].id, "a");
        let current = gallery.snapshot();
        assert_eq!(current.version, 2);
        assert_eq!(current.identities.len(), 2);
    }
}
