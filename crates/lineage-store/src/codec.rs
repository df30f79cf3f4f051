//! Little-endian `f32` blob codec for embedding vectors.

use lineage_core::{Error, Result, EMBEDDING_DIM};

/// Serialize a vector into a little-endian `f32` byte blob.
pub fn encode_vector(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(values));
    for &value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize a blob produced by [`encode_vector`].
///
/// Rejects blobs of the wrong byte length for a 512-dimension vector and
/// blobs containing non-finite values — either means the row is corrupt.
pub fn decode_vector(blob: &[u8]) -> Result<Vec<f32>> {
    let expected = EMBEDDING_DIM * std::mem::size_of::<f32>();
    if blob.len() != expected {
        return Err(Error::StorageUnavailable(format!(
            "corrupt embedding blob: expected {expected} bytes, got {}",
            blob.len()
        )));
    }

    let mut values = Vec::with_capacity(EMBEDDING_DIM);
    for chunk in blob.chunks_exact(4) {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() {
            return Err(Error::StorageUnavailable(
                "corrupt embedding blob: non-finite value".to_string(),
            ));
        }
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[0] = 0.25;
        values[511] = -1.5;
        let blob = encode_vector(&values);
        assert_eq!(blob.len(), EMBEDDING_DIM * 4);
        assert_eq!(decode_vector(&blob).unwrap(), values);
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(decode_vector(&[0u8; 8]).is_err());
    }

    #[test]
    fn non_finite_rejected() {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[3] = f32::NAN;
        let blob = encode_vector(&values);
        assert!(decode_vector(&blob).is_err());
    }
}
