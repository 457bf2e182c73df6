pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Vec<f32>;

    fn embed_all(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

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

fn fnv1a(chars: &[char]) -> u64 {
    let mut buffer = [0u8; 4];
    chars.iter().fold(FNV_OFFSET, |hash, c| {
        c.encode_utf8(&mut buffer)
            .bytes()
            .fold(hash, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
    })
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions()];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        if chars.is_empty() {
            return vector;
        }

        let buckets = vector.len() as u64;
        if chars.len() < 3 {
            vector[(fnv1a(&chars) % buckets) as usize] = 1.0;
            return vector;
        }

        for window in chars.windows(3) {
            vector[(fnv1a(window) % buckets) as usize] += 1.0;
        }

        let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vector.iter_mut().for_each(|v| *v /= magnitude);
        }
        vector
    }
}
