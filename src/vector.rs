//! Vector utilities: cosine similarity and the embedding blob codec.
//!
//! Embeddings are persisted as packed little-endian IEEE-754 single-precision
//! bytes, `4·D` per vector, so stores written on one platform read back
//! identically on another.

/// Computes cosine similarity between two vectors.
///
/// Defined as `⟨a,b⟩ / (‖a‖·‖b‖)`. Returns 0.0 when either input has zero
/// norm or when the lengths differ, so degenerate vectors rank below any
/// positive threshold instead of producing NaN.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Packs a float vector into a little-endian byte blob.
#[must_use]
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Unpacks a little-endian byte blob into a float vector.
///
/// Trailing bytes that do not form a whole float are ignored.
#[must_use]
pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_similarity(&a, &b)).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_norm() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 2.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_length_mismatch() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_blob_round_trip() {
        let original = vec![0.25f32, -1.5, 3.75, f32::MIN_POSITIVE, 0.0];
        let blob = embedding_to_blob(&original);
        assert_eq!(blob.len(), original.len() * 4);
        let decoded = blob_to_embedding(&blob);
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_blob_little_endian_layout() {
        let blob = embedding_to_blob(&[1.0f32]);
        assert_eq!(blob, 1.0f32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_blob_empty() {
        assert!(embedding_to_blob(&[]).is_empty());
        assert!(blob_to_embedding(&[]).is_empty());
    }

    #[test]
    fn test_blob_ignores_trailing_bytes() {
        let mut blob = embedding_to_blob(&[2.0f32]);
        blob.push(0xFF);
        assert_eq!(blob_to_embedding(&blob), vec![2.0f32]);
    }
}
