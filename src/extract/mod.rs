//! Ad-URL extraction and DOM scraping.
//!
//! `adurl` knows how ad networks encode click-throughs, `dom` builds the
//! in-page collection scripts, and `fusion` reconciles the independent signal
//! sources into one deduplicated result set.

pub mod adurl;
pub mod dom;
mod fusion;

pub use fusion::{AdUrlFusion, AdUrlSet, SourceStrategy};
