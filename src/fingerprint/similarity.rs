use log::info;

use super::hash::{Fingerprint, HASH_BITS};

/// Hamming distances strictly below this count as the same scene.
pub const DEFAULT_THRESHOLD: u32 = 5;

/// `1 - d/64`, reported alongside every comparison.
pub fn similarity_score(distance: u32) -> f64 {
    1.0 - f64::from(distance) / f64::from(HASH_BITS)
}

/// Pairwise duplicate test. Absent fingerprints are never similar.
pub fn is_similar(a: Option<Fingerprint>, b: Option<Fingerprint>, threshold: u32) -> bool {
    let (Some(a), Some(b)) = (a, b) else {
        return false;
    };

    let distance = a.distance(b);
    info!(
        "Image similarity: {:.2}% (distance: {})",
        similarity_score(distance) * 100.0,
        distance
    );
    distance < threshold
}
