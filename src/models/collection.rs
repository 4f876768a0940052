//! Destination collection definition.
//!
//! Collections are owned by the administration layer; the indexer reads them
//! to decide where each capture is submitted.

use serde::{Deserialize, Serialize};

/// A destination collection with its index endpoints and URL filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    /// Store-assigned identifier
    pub id: u64,

    /// Display name, also used as the stats rollup key
    pub name: String,

    /// CDX server endpoint receiving bulk index submissions
    pub cdx_url: String,

    /// Optional full-text index endpoint (consumed by the Solr indexer)
    pub solr_url: Option<String>,

    /// Ordered URL-prefix filters; an empty list accepts every capture
    #[serde(default)]
    pub url_filters: Vec<String>,
}
