//! Identities and face embeddings

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The identity a verification attempt tries to confirm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub display_name: String,
}

impl Identity {
    pub fn new(id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// Fixed-length face descriptor produced by a `FaceProcessor`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEmbedding {
    pub vector: Vec<f32>,
}

impl FaceEmbedding {
    /// Wrap a vector, scaling it to unit L2 norm. Returns `None` for an
    /// empty, all-zero or non-finite vector.
    pub fn normalized(mut vector: Vec<f32>) -> Option<Self> {
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if vector.is_empty() || !norm.is_finite() || norm == 0.0 {
            return None;
        }
        for x in &mut vector {
            *x /= norm;
        }
        Some(Self { vector })
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}
