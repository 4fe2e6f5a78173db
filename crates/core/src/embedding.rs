//! Embedding adapters.
//!
//! An adapter is chosen once when a collection is created and stored in its
//! catalog entry. `Precomputed` collections only accept caller-supplied vectors;
//! `Hashing` collections can also embed text locally with signed feature hashing.

use crate::config;
use crate::error::{Error, Result};
use crate::hnsw::Space;
use serde::{Deserialize, Serialize};

/// Input to an embedding function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingInput<'a> {
    Text(&'a str),
    Image(&'a [u8]),
}

/// Maps inputs to fixed-length vectors.
pub trait EmbeddingFunction: Send + Sync {
    /// Embeds every input, returning one vector per input in order.
    fn embed(&self, inputs: &[EmbeddingInput<'_>]) -> Result<Vec<Vec<f32>>>;

    /// Length of the produced vectors, if fixed by the adapter.
    fn dimension(&self) -> Option<usize>;

    /// Distance space the vectors are meant for, if the adapter has a preference.
    fn space(&self) -> Option<Space>;
}

/// Adapter selected at collection creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingAdapter {
    /// Embeddings are always supplied by the caller.
    #[default]
    Precomputed,
    /// Signed feature hashing of lowercase word tokens into `dimension` buckets.
    Hashing { dimension: usize },
}

impl EmbeddingAdapter {
    pub fn name(&self) -> &'static str {
        match self {
            EmbeddingAdapter::Precomputed => "precomputed",
            EmbeddingAdapter::Hashing { .. } => "hashing",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            EmbeddingAdapter::Precomputed => Ok(()),
            EmbeddingAdapter::Hashing { dimension } => {
                if *dimension == 0 || *dimension > config::MAX_DIMENSION {
                    return Err(Error::invalid_config(format!(
                        "hashing dimension must be between 1 and {}, got {dimension}",
                        config::MAX_DIMENSION
                    )));
                }
                Ok(())
            }
        }
    }

    /// Convenience wrapper embedding a batch of texts.
    pub fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<EmbeddingInput<'_>> =
            texts.iter().map(|t| EmbeddingInput::Text(t)).collect();
        self.embed(&inputs)
    }
}

impl EmbeddingFunction for EmbeddingAdapter {
    fn embed(&self, inputs: &[EmbeddingInput<'_>]) -> Result<Vec<Vec<f32>>> {
        match self {
            EmbeddingAdapter::Precomputed => Err(Error::Embedding(
                "collection uses precomputed embeddings; supply embeddings explicitly".into(),
            )),
            EmbeddingAdapter::Hashing { dimension } => inputs
                .iter()
                .map(|input| match input {
                    EmbeddingInput::Text(text) => Ok(hash_text(text, *dimension)),
                    EmbeddingInput::Image(_) => Err(Error::Embedding(
                        "hashing adapter does not accept image input".into(),
                    )),
                })
                .collect(),
        }
    }

    fn dimension(&self) -> Option<usize> {
        match self {
            EmbeddingAdapter::Precomputed => None,
            EmbeddingAdapter::Hashing { dimension } => Some(*dimension),
        }
    }

    fn space(&self) -> Option<Space> {
        match self {
            EmbeddingAdapter::Precomputed => None,
            EmbeddingAdapter::Hashing { .. } => Some(Space::Cosine),
        }
    }
}

fn hash_text(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];
    let lowered = text.to_lowercase();
    for token in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let h = crc32fast::hash(token.as_bytes());
        let bucket = h as usize % dimension;
        let sign = if h & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashing_is_deterministic_and_normalized() {
        let adapter = EmbeddingAdapter::Hashing { dimension: 64 };
        let a = adapter.embed(&[EmbeddingInput::Text("Hello, World")]).unwrap();
        let b = adapter.embed(&[EmbeddingInput::Text("hello world")]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashing_empty_text_is_zero() {
        let adapter = EmbeddingAdapter::Hashing { dimension: 8 };
        let v = adapter.embed_texts(&["  ".to_string()]).unwrap();
        assert!(v[0].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_precomputed_refuses_to_embed() {
        assert!(matches!(
            EmbeddingAdapter::Precomputed.embed(&[EmbeddingInput::Text("x")]),
            Err(Error::Embedding(_))
        ));
    }

    #[test]
    fn test_hashing_rejects_images() {
        let adapter = EmbeddingAdapter::Hashing { dimension: 8 };
        assert!(adapter.embed(&[EmbeddingInput::Image(&[1, 2, 3])]).is_err());
    }

    #[test]
    fn test_validate_dimension() {
        assert!(EmbeddingAdapter::Hashing { dimension: 0 }.validate().is_err());
        assert!(EmbeddingAdapter::Hashing { dimension: 16 }.validate().is_ok());
        assert_eq!(EmbeddingAdapter::Precomputed.dimension(), None);
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(EmbeddingAdapter::Hashing { dimension: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({"hashing": {"dimension": 4}}));
        let back: EmbeddingAdapter = serde_json::from_value(serde_json::json!("precomputed")).unwrap();
        assert_eq!(back, EmbeddingAdapter::Precomputed);
    }
}
