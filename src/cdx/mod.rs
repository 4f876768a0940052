// src/cdx/mod.rs

//! CDX index production: URL canonicalization, record building, and the
//! line-oriented submission format.

pub mod builder;
pub mod canonical;
pub mod format;

pub use builder::RecordBuilder;
