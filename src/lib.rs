//! Portfolio company update tracking for venture funds.
//!
//! Forwarded investor emails go through a synchronous pipeline:
//! classification (is this a company update, and from whom), company
//! resolution against the registry, dedup, attachment capture, and
//! financial metric extraction with dual raw/normalized storage. A
//! separate alert pass escalates companies that have gone silent.

pub mod alerts;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod mail;
pub mod metrics;
pub mod normalize;
pub mod oracle;
pub mod report;
pub mod resolver;
