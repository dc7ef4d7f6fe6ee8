#![forbid(unsafe_code)]

//! Communicator configuration.

/// Default client page size.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Default backend chunk used when scanning a level.
pub const DEFAULT_SCAN_CHUNK: usize = 100;

/// Default client-side property holding the item key.
pub const DEFAULT_UNIQUE_KEY_PROPERTY: &str = "key";

/// Tuning knobs for [`crate::HierarchicalDataCommunicator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunicatorConfig {
    /// Client page size. Used to derive the page index of a parent request.
    pub page_size: usize,
    /// Backend page size when walking a level to locate expanded subtrees.
    pub scan_chunk: usize,
    /// Client property name carrying the item key.
    pub unique_key_property: String,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            scan_chunk: DEFAULT_SCAN_CHUNK,
            unique_key_property: DEFAULT_UNIQUE_KEY_PROPERTY.to_string(),
        }
    }
}

impl CommunicatorConfig {
    /// Set the client page size. Zero is treated as one.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set the scan chunk. Zero is treated as one.
    #[must_use]
    pub fn with_scan_chunk(mut self, scan_chunk: usize) -> Self {
        self.scan_chunk = scan_chunk.max(1);
        self
    }

    /// Set the client key property.
    #[must_use]
    pub fn with_unique_key_property(mut self, property: impl Into<String>) -> Self {
        self.unique_key_property = property.into();
        self
    }

    /// Page index containing child index `start`.
    #[must_use]
    pub fn page_of(&self, start: usize) -> usize {
        start / self.page_size.max(1)
    }
}
