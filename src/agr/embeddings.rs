use anyhow::{Context, Result, anyhow};
use derive_more::{From, IntoIterator};
use ndarray::Array2;
use rust_bert::pipelines::sentence_embeddings;
use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};
use tch::Device;
use tracing::{info, instrument};

use super::model::Shape;

/// Anything that can turn strings into fixed-length vectors.
pub trait EmbeddingProvider {
    /// One embedding per input text, in order, all the same length.
    fn embed(&self, texts: &[String]) -> Result<Embeddings>;
}

/// A rust-bert sentence embedding model, loaded once and then shared by
/// reference for the lifetime of the process.
pub struct SentenceEmbedder {
    model: sentence_embeddings::SentenceEmbeddingsModel,
    model_type: SentenceEmbeddingsModelType,
}

impl SentenceEmbedder {
    /// Fetch (or reuse the cached copy of) `model_type` and load it on `device`.
    #[instrument(skip(device), fields(device = ?device))]
    pub fn load(model_type: SentenceEmbeddingsModelType, device: Device) -> Result<Self> {
        let model = sentence_embeddings::SentenceEmbeddingsBuilder::remote(model_type.into())
            .with_device(device)
            .create_model()
            .with_context(|| format!("SentenceEmbedder::load({})", model_type))?;
        info!(model = %model_type, "sentence embedding model loaded");
        Ok(Self { model, model_type })
    }

    /// Load on the GPU when one is available.
    pub fn load_default_device(model_type: SentenceEmbeddingsModelType) -> Result<Self> {
        Self::load(model_type, Device::cuda_if_available())
    }

    pub fn model_type(&self) -> SentenceEmbeddingsModelType {
        self.model_type
    }
}

impl std::fmt::Debug for SentenceEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentenceEmbedder")
            .field("model_type", &self.model_type)
            .finish()
    }
}

impl EmbeddingProvider for SentenceEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Embeddings> {
        self.model
            .encode(texts)
            .map(Embeddings::from)
            .map_err(|e| anyhow!(e))
            .with_context(|| format!("SentenceEmbedder::embed({} texts)", texts.len()))
    }
}

// ========================================================================
// Types

/// Newtype wrapper around Embeddings.
/// Wraps a [`Vec<Vec<f32>>`] for type safety, and associates various utility methods.
#[derive(Debug, Clone, Default, From, Serialize, Deserialize, IntoIterator, PartialEq)]
#[serde(transparent)]
pub struct Embeddings(#[into_iterator(owned, ref)] Vec<Vec<f32>>);

impl Embeddings {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&[f32]> {
        self.0.get(index).map(Vec::as_slice)
    }

    /// Length of each vector; 0 when there are none.
    pub fn dimensions(&self) -> usize {
        self.0.first().map(Vec::len).unwrap_or(0)
    }

    pub fn shape(&self) -> Shape {
        (self.0.len(), self.dimensions()).into()
    }

    /// Convert into an Array2, one row per embedding.
    pub fn as_ndarray(&self) -> Result<Array2<f32>> {
        let shape = self.shape();
        let flattened = self.0.iter().flatten().copied().collect::<Vec<f32>>();
        let dims: (usize, usize) = shape.into();
        Array2::from_shape_vec(dims, flattened)
            .with_context(|| format!("Embeddings::as_ndarray, shape: {}", shape))
    }
}

/// Native enum that maps to a [`sentence_embeddings::SentenceEmbeddingsModelType`].
/// The foreign type can't receive derives, so this mirrors it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    IntoStaticStr,
    EnumString,
    strum::Display,
)]
pub enum SentenceEmbeddingsModelType {
    DistiluseBaseMultilingualCased,
    BertBaseNliMeanTokens,
    AllMiniLmL12V2,
    #[default]
    AllMiniLmL6V2,
    AllDistilrobertaV1,
    ParaphraseAlbertSmallV2,
    SentenceT5Base,
}

impl From<SentenceEmbeddingsModelType> for sentence_embeddings::SentenceEmbeddingsModelType {
    fn from(val: SentenceEmbeddingsModelType) -> Self {
        use sentence_embeddings::SentenceEmbeddingsModelType as Remote;
        match val {
            SentenceEmbeddingsModelType::DistiluseBaseMultilingualCased => {
                Remote::DistiluseBaseMultilingualCased
            }
            SentenceEmbeddingsModelType::BertBaseNliMeanTokens => Remote::BertBaseNliMeanTokens,
            SentenceEmbeddingsModelType::AllMiniLmL12V2 => Remote::AllMiniLmL12V2,
            SentenceEmbeddingsModelType::AllMiniLmL6V2 => Remote::AllMiniLmL6V2,
            SentenceEmbeddingsModelType::AllDistilrobertaV1 => Remote::AllDistilrobertaV1,
            SentenceEmbeddingsModelType::ParaphraseAlbertSmallV2 => {
                Remote::ParaphraseAlbertSmallV2
            }
            SentenceEmbeddingsModelType::SentenceT5Base => Remote::SentenceT5Base,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_embeddings_as_ndarray() {
        let e = Embeddings::from(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert_eq!(e.dimensions(), 3);
        let a = e.as_ndarray().unwrap();
        assert_eq!(a.dim(), (2, 3));
        assert_eq!(a[[1, 0]], 4.0);

        let ragged = Embeddings::from(vec![vec![1.0, 2.0], vec![3.0]]);
        assert!(ragged.as_ndarray().is_err());
        assert_eq!(Embeddings::default().dimensions(), 0);
    }

    #[test]
    fn test_model_type_names() {
        assert_eq!(
            SentenceEmbeddingsModelType::from_str("AllMiniLmL6V2").unwrap(),
            SentenceEmbeddingsModelType::default()
        );
        let name: &'static str = SentenceEmbeddingsModelType::SentenceT5Base.into();
        assert_eq!(name, "SentenceT5Base");
    }

    /// Downloads model weights on first run.
    #[test]
    #[ignore]
    fn test_sentence_embedder() {
        let embedder =
            SentenceEmbedder::load(SentenceEmbeddingsModelType::AllMiniLmL6V2, Device::Cpu)
                .expect("Failed to load embedding model");
        let texts = vec!["a cat".to_owned(), "a kitten".to_owned(), "tax law".to_owned()];
        let embeddings = embedder.embed(&texts).unwrap();
        assert_eq!(embeddings.len(), 3);
        assert_eq!(embeddings.dimensions(), 384);
    }
}
