//! Worker library for genomic knowledge-base filtering.
//!
//! The crate wraps a read-mostly knowledge database (SNPs, biopolymers,
//! groups, liftOver chains) behind a query planner that composes join
//! plans over a fixed table-alias graph, applies session input filters,
//! and streams filtered, annotated, model or PARIS output rows.

pub mod common;
pub mod db;
pub mod filters;
pub mod output;
pub mod paris;
pub mod query;
