use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::FilterType, DynamicImage};
use thiserror::Error;

/// Side length of the downsampled grid the hash is computed over.
pub const HASH_SIDE: u32 = 8;
pub const HASH_BITS: u32 = HASH_SIDE * HASH_SIDE;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("invalid base64 image payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unable to decode image: {0}")]
    Image(#[from] image::ImageError),
}

/// 64-bit average hash of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    #[cfg(test)]
    pub(crate) const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Number of differing bits, 0..=64.
    pub fn distance(self, other: Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Fingerprints an image carried as a data URL (`data:image/png;base64,....`)
/// or as bare base64.
pub fn fingerprint_data_url(payload: &str) -> Result<Fingerprint, FingerprintError> {
    let encoded = match payload.split_once(',') {
        Some((_, rest)) => rest,
        None => payload,
    };
    let bytes = STANDARD.decode(encoded.trim())?;
    fingerprint_bytes(&bytes)
}

pub fn fingerprint_bytes(bytes: &[u8]) -> Result<Fingerprint, FingerprintError> {
    let img = image::load_from_memory(bytes)?;
    Ok(average_hash(&img))
}

/// Grayscale, shrink to an 8x8 grid, then set one bit per cell that is
/// brighter than the grid mean. Bits are packed MSB first in row-major order.
pub fn average_hash(img: &DynamicImage) -> Fingerprint {
    let gray = img.to_luma8();
    let grid = image::imageops::resize(&gray, HASH_SIDE, HASH_SIDE, FilterType::Lanczos3);

    let total: u32 = grid.pixels().map(|p| u32::from(p.0[0])).sum();
    let mean = f64::from(total) / f64::from(HASH_BITS);

    let bits = grid
        .pixels()
        .enumerate()
        .filter(|(_, p)| f64::from(p.0[0]) > mean)
        .fold(0u64, |acc, (idx, _)| acc | (1u64 << (HASH_BITS as usize - 1 - idx)));

    Fingerprint(bits)
}
