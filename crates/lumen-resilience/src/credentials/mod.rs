//! Ordered set of interchangeable API credentials.

use lumen_core::{LumenError, LumenResult};
use std::fmt;
use std::sync::Arc;

/// An ordered, non-empty list of credentials.
///
/// Cloning is cheap; clones share the same storage.
#[derive(Clone)]
pub struct CredentialSet {
    keys: Arc<[String]>,
}

impl CredentialSet {
    /// Creates a credential set, rejecting an empty or blank list.
    pub fn new<I, S>(keys: I) -> LumenResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            return Err(LumenError::configuration("At least one API credential is required"));
        }
        if let Some(index) = keys.iter().position(|key| key.trim().is_empty()) {
            return Err(LumenError::Configuration(format!("API credential #{} is blank", index)));
        }
        Ok(Self { keys: keys.into() })
    }

    /// Number of credentials. Always at least one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false; present for API symmetry with [`Self::len`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns the credential at `index`, wrapping modulo the set length.
    #[must_use]
    pub fn get(&self, index: usize) -> &str {
        &self.keys[index % self.keys.len()]
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("len", &self.keys.len())
            .finish_non_exhaustive()
    }
}
