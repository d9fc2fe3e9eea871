pub mod builder;
pub mod categorize;
pub mod enrichment;
pub mod extractor;
pub mod geo_cache;
pub mod geocoder;
pub mod stats;
