//! Vector codec — conversions between in-memory `f32` slices and the
//! little-endian BLOB representation stored in SQLite. Similarity math
//! happens in SQL via sqlite-vec's `vec_distance_cosine`; this module
//! only moves bytes.

use crate::error::{MemoryError, Result};

/// Convert an f32 embedding slice to a little-endian BLOB for storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vec.len() * 4);
    for x in vec {
        blob.extend_from_slice(&x.to_le_bytes());
    }
    blob
}

/// Convert a stored BLOB back into an f32 vector.
///
/// Fails if the blob length is not a multiple of 4 (a corrupt or foreign
/// value in the embedding column).
pub fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(MemoryError::Embedding(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    let mut vec = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        vec.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(vec)
}
