use xxhash_rust::xxh3::Xxh3;

/// Hex rendering of a finished xxh3-128 digest
pub fn digest_hex(hasher: &Xxh3) -> String {
    format!("{:032x}", hasher.digest128())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(chunks: &[&[u8]]) -> String {
        let mut hasher = Xxh3::new();
        for chunk in chunks {
            hasher.update(chunk);
        }
        digest_hex(&hasher)
    }

    #[test]
    fn test_digest_is_stable_and_wide() {
        let hash = hash_of(&[b"hello world"]);
        assert_eq!(hash.len(), 32);
        assert_eq!(hash, hash_of(&[b"hello world"]));
        assert_ne!(hash, hash_of(&[b"hello world!"]));
    }

    #[test]
    fn test_chunking_does_not_change_digest() {
        assert_eq!(hash_of(&[b"hello ", b"world"]), hash_of(&[b"hello world"]));
    }
}
