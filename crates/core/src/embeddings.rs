use crate::error::ServiceError;
use async_trait::async_trait;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Output dimensionality, when known before the first call.
    fn dimensions(&self) -> Option<usize>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Box<T> {
    fn dimensions(&self) -> Option<usize> {
        (**self).dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        (**self).embed(text).await
    }
}

/// Deterministic local embedder hashing character trigrams into buckets.
/// Needs no network, so it also backs offline indexing.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

impl CharacterNgramEmbedder {
    /// Bucket counts of lowercase character trigrams, scaled to unit length.
    /// Texts shorter than three characters embed to the zero vector.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let buckets = self.dimensions.max(1);
        let chars: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();

        let mut vector = vec![0f32; buckets];
        for trigram in chars.windows(3) {
            vector[trigram_bucket(trigram, buckets)] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

/// FNV-1a over the UTF-8 bytes of the trigram.
fn trigram_bucket(trigram: &[char], buckets: usize) -> usize {
    let mut utf8 = [0u8; 4];
    let mut hash = FNV_OFFSET;
    for ch in trigram {
        for byte in ch.encode_utf8(&mut utf8).bytes() {
            hash = (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME);
        }
    }
    (hash % buckets as u64) as usize
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|value| *value /= norm);
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions.max(1))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        Ok(self.embed_sync(text))
    }
}
