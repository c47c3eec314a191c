//! Content hashing of render results.
//!
//! Hashes the resident pass pixels of a result so two renders of the same
//! frame can be compared bit for bit regardless of how their parts finished.

use sha2::{Digest, Sha256};

use crate::result::RenderResult;

/// A SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    bytes: [u8; 32],
}

impl ContentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

fn finish(hasher: Sha256) -> ContentHash {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    ContentHash::from_bytes(bytes)
}

/// Hash dimensions, layer names and every resident pass of `result`.
pub fn hash_result(result: &RenderResult) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(result.rectx.to_le_bytes());
    hasher.update(result.recty.to_le_bytes());
    for layer in &result.layers {
        hasher.update(layer.name.as_bytes());
        for pass in layer.passes.iter().filter(|p| p.is_resident()) {
            hasher.update(pass.pass_type.name().as_bytes());
            hasher.update((pass.view_id as u64).to_le_bytes());
            for v in &pass.rect {
                hasher.update(v.to_le_bytes());
            }
        }
    }
    for view in &result.views {
        if let Some(rectf) = &view.rectf {
            for v in rectf {
                hasher.update(v.to_le_bytes());
            }
        }
    }
    finish(hasher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rect::Rect;
    use crate::result::{LayerSelector, ResultLayout, StorageMode, ViewSelector};

    fn result(w: i32, h: i32) -> RenderResult {
        RenderResult::new(
            &ResultLayout::simple("L"),
            Rect::from_size(w, h),
            0,
            StorageMode::Memory,
            LayerSelector::All,
            ViewSelector::All,
        )
        .unwrap()
    }

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash_result(&result(4, 4)), hash_result(&result(4, 4)));
    }

    #[test]
    fn test_hash_different_content() {
        let a = result(4, 4);
        let mut b = result(4, 4);
        b.layers[0].passes[0].rect[0] = 1.0;
        assert_ne!(hash_result(&a), hash_result(&b));
    }

    #[test]
    fn test_hash_different_size() {
        assert_ne!(hash_result(&result(4, 4)), hash_result(&result(8, 2)));
    }

    #[test]
    fn test_hash_hex_format() {
        let hash = hash_result(&result(1, 1));
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(format!("{}", hash), hex);
    }
}
