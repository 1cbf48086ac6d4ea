use sha2::{Digest, Sha256};
use std::fmt;

/// Digest of the canonical identifier, stamped into the hardware package and the
/// name of its thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareIdentifier(String);

impl HardwareIdentifier {
    /// Hashes `identifier` with `prefix` stripped. An identifier without the prefix
    /// is hashed as-is.
    pub fn compute(identifier: &str, prefix: &str) -> HardwareIdentifier {
        let stripped = identifier.strip_prefix(prefix).unwrap_or(identifier);
        let mut hasher = Sha256::new();
        hasher.update(stripped.as_bytes());
        HardwareIdentifier(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn thumbnail_file_name(&self) -> String {
        format!("thumbnail_{}_EBOK_portrait.jpg", self.0)
    }
}

impl fmt::Display for HardwareIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The stem shared by every artifact: the identifier with its prefix, scheme, host
/// and a leading `ebooks/` removed, slashes turned into underscores.
pub fn output_base_name(identifier: &str, prefix: &str) -> Option<String> {
    let stripped = identifier.strip_prefix(prefix).unwrap_or(identifier);
    let path = match stripped.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or(""),
        None => stripped,
    };
    let path = path.trim_matches('/');
    let path = path.strip_prefix("ebooks/").unwrap_or(path);
    let name = path
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    (!name.is_empty()).then_some(name)
}
