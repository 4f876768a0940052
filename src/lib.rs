// src/lib.rs

//! CDX indexing pipeline and access-control rule engine for web-archive
//! collections.
//!
//! Two tightly coupled subsystems share one URL-canonicalization primitive:
//! the indexing pipeline turns WARC/ARC containers into per-collection
//! filtered CDX submissions while advancing a durable per-file state
//! machine, and the rule engine answers "is this capture visible, and under
//! what policy" against an atomically swapped rule-set snapshot.

pub mod archive;
pub mod cdx;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod rules;
pub mod storage;
