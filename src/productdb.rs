//! Product information lookup.
//!
//! The DALI Alliance publishes registration data for every GTIN. Fetching
//! and caching that data is outside this crate; implementations of
//! [ProductInfoSource] plug in here and enrich scanned gear with metadata.
//! Lookup failure is never fatal, gear simply stays anonymous.

/// Registration record for a GTIN
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductRecord {
    pub brand_name: String,
    pub product_name: String,
    /// IEC 62386 part numbers the product implements
    pub dali_parts: Vec<u16>,
    pub initial_registration: Option<String>,
    pub last_updated: Option<String>,
}

/// Best-effort metadata lookup keyed by GTIN
pub trait ProductInfoSource: Send + Sync {
    fn fetch(&self, gtin: u64) -> Option<ProductRecord>;
}
