use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// 32 bytes length generic hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    /// Fingerprint for the content cache: the record path, its input bytes,
    /// and the transform parameters, chained in order. Output paths derive
    /// from input paths, so identical bytes under different paths key
    /// separately. Identical fingerprints must yield byte-identical cached
    /// output.
    pub fn fingerprint(
        path: impl AsRef<[u8]>,
        content: impl AsRef<[u8]>,
        params: impl AsRef<[u8]>,
    ) -> Self {
        blake3::Hasher::new()
            .update(path.as_ref())
            .update(content.as_ref())
            .update(params.as_ref())
            .finalize()
            .into()
    }

    pub fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new()
            .update_mmap_rayon(path)?
            .finalize()
            .into())
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = vec![0u8; 64];

        for (i, &byte) in self.0.iter().enumerate() {
            acc[i * 2] = HEX[(byte >> 4) as usize];
            acc[i * 2 + 1] = HEX[(byte & 0xF) as usize];
        }

        String::from_utf8(acc).unwrap()
    }
}

impl Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_depends_on_path_and_params() {
        let a = Hash32::fingerprint("img/a.png", b"pixels", b"width=800");
        let b = Hash32::fingerprint("img/a.png", b"pixels", b"width=400");
        let c = Hash32::fingerprint("img/b.png", b"pixels", b"width=800");
        let d = Hash32::fingerprint("img/a.png", b"pixels", b"width=800");

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, d);
    }

    #[test]
    fn hex_is_stable() {
        let hash = Hash32::hash(b"");
        assert_eq!(hash.to_hex().len(), 64);
        assert_eq!(hash, Hash32::hash(b""));
    }
}
