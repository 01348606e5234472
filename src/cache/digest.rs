use sha1::{Digest, Sha1};
use std::fmt;

use super::CacheError;
use crate::key::{StageRole, VariantKey, role_tag};
use crate::shader::ShaderProgram;

/// Bumped whenever the persistent entry layout or key derivation changes.
pub const CACHE_FORMAT_VERSION: u32 = 1;

const DIGEST_SIZE: usize = 20;

fn finish(hasher: Sha1) -> [u8; DIGEST_SIZE] {
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(text: &str) -> Result<[u8; DIGEST_SIZE], CacheError> {
    let invalid = || CacheError::InvalidKey(text.to_owned());
    if text.len() != DIGEST_SIZE * 2 || !text.is_ascii() {
        return Err(invalid());
    }
    let mut out = [0u8; DIGEST_SIZE];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&text[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
    }
    Ok(out)
}

/// SHA-1 of a program's serialized form and stream-output descriptors.
///
/// Identical programs hash identically no matter which selector owns them,
/// which is what lets one selector's compile satisfy another's lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramDigest([u8; DIGEST_SIZE]);

impl ProgramDigest {
    pub fn of_program(program: &ShaderProgram) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(program.serialize());
        hasher.update(program.stream_output().to_bytes());
        Self(finish(hasher))
    }

    pub fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    fn derive(&self, domain: &[u8], extra: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(self.0);
        hasher.update(domain);
        hasher.update(extra);
        Self(finish(hasher))
    }

    /// Digest of the main part lowered for `role`.
    pub fn for_main_part(&self, role: StageRole) -> Self {
        self.derive(b"main-part", &[role_tag(role)])
    }

    /// Digest of a monolithic build for `key`.
    ///
    /// Selector ids only live for one process, so a merged previous stage
    /// is identified by its own program digest instead.
    pub fn for_variant(&self, key: &VariantKey, previous: Option<&Self>) -> Self {
        let mut extra = key.without_previous_stage().to_bytes();
        if let Some(previous) = previous {
            extra.extend_from_slice(previous.as_bytes());
        }
        self.derive(b"variant", &extra)
    }
}

impl fmt::Display for ProgramDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_hex(&self.0))
    }
}

/// Key of an entry in the persistent layer.
///
/// Folds in the cache format version and the generator identifier so that
/// stale artifacts from an older layout or compiler are never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PersistentKey([u8; DIGEST_SIZE]);

impl PersistentKey {
    pub fn new(digest: &ProgramDigest, generator_id: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(CACHE_FORMAT_VERSION.to_le_bytes());
        hasher.update((generator_id.len() as u64).to_le_bytes());
        hasher.update(generator_id.as_bytes());
        hasher.update(digest.as_bytes());
        Self(finish(hasher))
    }

    pub fn from_hex(text: &str) -> Result<Self, CacheError> {
        from_hex(text).map(Self)
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }
}

impl fmt::Display for PersistentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ShaderStage;

    #[test]
    fn persistent_key_depends_on_generator() {
        let digest = ProgramDigest::from_bytes([7; DIGEST_SIZE]);
        assert_ne!(
            PersistentKey::new(&digest, "gen-a"),
            PersistentKey::new(&digest, "gen-b")
        );
        assert_eq!(
            PersistentKey::new(&digest, "gen-a"),
            PersistentKey::new(&digest, "gen-a")
        );
    }

    #[test]
    fn hex_parsing_accepts_own_output() {
        let key = PersistentKey::new(&ProgramDigest::from_bytes([3; DIGEST_SIZE]), "g");
        assert_eq!(PersistentKey::from_hex(&key.to_hex()).unwrap(), key);
        assert!(PersistentKey::from_hex("zz").is_err());
        assert!(PersistentKey::from_hex(&"g".repeat(40)).is_err());
    }

    #[test]
    fn derived_digests_are_distinct() {
        let base = ProgramDigest::from_bytes([1; DIGEST_SIZE]);
        let key = VariantKey::new(ShaderStage::Vertex);
        let derived = [
            base,
            base.for_main_part(StageRole::AsLs),
            base.for_main_part(StageRole::AsEs),
            base.for_variant(&key, None),
            base.for_variant(&key, Some(&base)),
        ];
        for (i, a) in derived.iter().enumerate() {
            for b in &derived[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
