//! Deciding which host blocks belong to brevsync.
//!
//! Managed entries carry no explicit tag. A block is ours when its
//! `IdentityFile` token is exactly the one we write for the private key path,
//! compared as plain strings (no `~` expansion, no canonicalization, no quote
//! stripping).

use crate::core::document::HostBlock;
use crate::core::render::identity_file_token;

/// Ownership rule for host blocks.
pub trait OwnershipClassifier {
    /// Whether the block is a managed entry.
    fn is_managed(&self, block: &HostBlock) -> bool;

    /// Alias used to match the block against workspace identifiers.
    /// `None` when the header has no alias; such blocks never match.
    fn alias<'b>(&self, block: &'b HostBlock) -> Option<&'b str> {
        Some(block.alias()).filter(|alias| !alias.is_empty())
    }
}

/// Marks blocks whose `IdentityFile` equals a fixed key path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityFileClassifier {
    key_path: String,
}

impl IdentityFileClassifier {
    pub fn new(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
        }
    }

    pub fn key_path(&self) -> &str {
        &self.key_path
    }
}

impl OwnershipClassifier for IdentityFileClassifier {
    fn is_managed(&self, block: &HostBlock) -> bool {
        block.identity_file() == Some(identity_file_token(&self.key_path).as_ref())
    }
}
