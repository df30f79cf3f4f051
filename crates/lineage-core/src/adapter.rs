//! Face-model collaborator seam.

use crate::error::Result;
use crate::types::Embedding;

/// Turns raw image bytes into a face embedding.
///
/// The engines never decode images or run detection themselves — an
/// implementation wraps whatever detection/recognition pipeline the
/// deployment ships (the daemon accepts one at construction and reports
/// unsupported when none is wired). `NoFaceDetected` passes through to
/// callers verbatim.
pub trait FaceEmbedder: Send + Sync {
    fn extract(&self, image_bytes: &[u8]) -> Result<Embedding>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::EMBEDDING_DIM;

    /// Stub embedder: a non-empty image maps to a fixed unit vector.
    struct StubEmbedder;

    impl FaceEmbedder for StubEmbedder {
        fn extract(&self, image_bytes: &[u8]) -> Result<Embedding> {
            if image_bytes.is_empty() {
                return Err(Error::NoFaceDetected);
            }
            let mut values = vec![0.0f32; EMBEDDING_DIM];
            values[0] = 1.0;
            Ok(Embedding::new(values))
        }
    }

    #[test]
    fn stub_passes_no_face_through() {
        let embedder: Box<dyn FaceEmbedder> = Box::new(StubEmbedder);
        assert!(matches!(embedder.extract(&[]), Err(Error::NoFaceDetected)));
        assert!(embedder.extract(&[1, 2, 3]).unwrap().is_unit_norm());
    }
}
