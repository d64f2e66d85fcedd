//! Validated value types
//!
//! Wraps raw strings in newtypes that enforce their invariants at
//! construction time, so the rest of the engine never has to re-validate
//! account identifiers or mirror-relative paths.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// AccountId
// ============================================================================

/// Identifier for a connected account.
///
/// Restricted to `[A-Za-z0-9_-]` because the id travels in HTTP headers and
/// is used as an on-disk directory name on the watcher host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Creates an `AccountId`, validating the character set.
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(DomainError::InvalidAccountId(id));
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// MirrorPath
// ============================================================================

/// A path relative to an account's folder root, slash-separated.
///
/// Rejects empty paths, absolute paths, and `..` components. The same type
/// addresses entries on both the canonical and mirror sides; the root
/// directory is represented by [`MirrorPath::root`] (the empty path).
/// Ordering is lexicographic on the slash-separated form, so a directory
/// sorts before the entries under it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MirrorPath(String);

impl MirrorPath {
    /// Creates a `MirrorPath` from a relative, slash-separated string.
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let path = path.into();
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(DomainError::InvalidMirrorPath(path));
        }
        if trimmed.split('/').any(|c| c.is_empty() || c == "..") {
            return Err(DomainError::InvalidMirrorPath(path));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The account folder root (empty relative path).
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Returns true if this is the account folder root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends a child component, returning the joined path.
    pub fn join(&self, name: &str) -> Result<Self, DomainError> {
        if self.is_root() {
            Self::new(name)
        } else {
            Self::new(format!("{}/{}", self.0, name))
        }
    }

    /// The final path component, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// Base64 encoding of the path for the `pathBase64` request header.
    ///
    /// Arbitrary Unicode filenames are not representable in HTTP headers,
    /// so every endpoint carries the path base64-encoded.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0.as_bytes())
    }

    /// Decodes a `pathBase64` header value back into a `MirrorPath`.
    pub fn from_base64(encoded: &str) -> Result<Self, DomainError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| DomainError::InvalidMirrorPath(encoded.to_string()))?;
        let s = String::from_utf8(bytes)
            .map_err(|_| DomainError::InvalidMirrorPath(encoded.to_string()))?;
        Self::new(s)
    }

    /// The path as a relative `std::path::Path` for filesystem joins.
    pub fn as_rel_path(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

impl std::fmt::Display for MirrorPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- AccountId --

    #[test]
    fn account_id_accepts_safe_charset() {
        assert!(AccountId::new("user_01-A").is_ok());
    }

    #[test]
    fn account_id_rejects_empty() {
        assert!(AccountId::new("").is_err());
    }

    #[test]
    fn account_id_rejects_separators_and_spaces() {
        assert!(AccountId::new("a/b").is_err());
        assert!(AccountId::new("a b").is_err());
        assert!(AccountId::new("a\nb").is_err());
        assert!(AccountId::new("a.b").is_err());
    }

    #[test]
    fn account_id_display_roundtrip() {
        let id = AccountId::new("acct-42").unwrap();
        assert_eq!(id.to_string(), "acct-42");
        assert_eq!(id.as_str(), "acct-42");
    }

    // -- MirrorPath --

    #[test]
    fn mirror_path_normalizes_leading_trailing_slashes() {
        let p = MirrorPath::new("/posts/hello.md/").unwrap();
        assert_eq!(p.as_str(), "posts/hello.md");
    }

    #[test]
    fn mirror_path_rejects_empty_and_dotdot() {
        assert!(MirrorPath::new("").is_err());
        assert!(MirrorPath::new("/").is_err());
        assert!(MirrorPath::new("a//b").is_err());
        assert!(MirrorPath::new("../a").is_err());
        assert!(MirrorPath::new("a/../b").is_err());
    }

    #[test]
    fn mirror_path_join_from_root() {
        let root = MirrorPath::root();
        assert!(root.is_root());
        let child = root.join("sub").unwrap();
        assert_eq!(child.as_str(), "sub");
        let nested = child.join("b.txt").unwrap();
        assert_eq!(nested.as_str(), "sub/b.txt");
    }

    #[test]
    fn mirror_path_file_name() {
        assert_eq!(MirrorPath::root().file_name(), None);
        let p = MirrorPath::new("sub/b.txt").unwrap();
        assert_eq!(p.file_name(), Some("b.txt"));
    }

    #[test]
    fn mirror_path_base64_roundtrip_unicode() {
        let p = MirrorPath::new("notes/café ☕.md").unwrap();
        let encoded = p.to_base64();
        assert!(encoded.is_ascii());
        let decoded = MirrorPath::from_base64(&encoded).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn mirror_path_from_base64_rejects_garbage() {
        assert!(MirrorPath::from_base64("!!not-base64!!").is_err());
    }

    #[test]
    fn mirror_path_sorts_directories_before_their_entries() {
        let mut paths = vec![
            MirrorPath::new("sub/a.md").unwrap(),
            MirrorPath::new("a.md").unwrap(),
            MirrorPath::new("sub").unwrap(),
        ];
        paths.sort();
        let order: Vec<&str> = paths.iter().map(MirrorPath::as_str).collect();
        assert_eq!(order, ["a.md", "sub", "sub/a.md"]);
    }
}
