//! Image references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A built or inspected container image.
///
/// Carries the tag the image was requested under and, when the runtime
/// reports one, the content-addressed image ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Full image reference (registry/repository:tag).
    reference: String,

    /// Image ID assigned by the runtime.
    pub id: Option<String>,
}

impl ImageRef {
    /// Creates an image reference from a tag string.
    ///
    /// # Examples
    ///
    /// ```
    /// use forge_orchestrator::container::ImageRef;
    ///
    /// let image = ImageRef::new("forge/api:1.2");
    /// assert_eq!(image.name(), "forge/api");
    /// assert_eq!(image.tag(), Some("1.2"));
    /// ```
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            id: None,
        }
    }

    /// Sets the runtime image ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Returns the full image reference.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Returns the image name (without tag or digest).
    pub fn name(&self) -> &str {
        let without_digest = self.reference.split('@').next().unwrap_or(&self.reference);
        match self.tag_separator(without_digest) {
            Some(idx) => &without_digest[..idx],
            None => without_digest,
        }
    }

    /// Returns the image tag if present.
    pub fn tag(&self) -> Option<&str> {
        let without_digest = self.reference.split('@').next()?;
        self.tag_separator(without_digest)
            .map(|idx| &without_digest[idx + 1..])
    }

    // A colon before the last slash belongs to a registry port, not a tag.
    fn tag_separator(&self, reference: &str) -> Option<usize> {
        let idx = reference.rfind(':')?;
        match reference.rfind('/') {
            Some(slash) if slash > idx => None,
            _ => Some(idx),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference)
    }
}

impl From<&str> for ImageRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ImageRef {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
