pub mod hash;
pub mod similarity;

pub use hash::{fingerprint_bytes, fingerprint_data_url, Fingerprint, FingerprintError};
pub use similarity::{is_similar, similarity_score, DEFAULT_THRESHOLD};
