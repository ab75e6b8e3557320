//! demux_stages
//!
//! Martian stages and local runner for hashtag demultiplexing with SNP
//! reassignment.
#![deny(missing_docs)]

pub mod io;
pub mod local;
pub mod params;
#[cfg(test)]
mod stage_testing;
pub mod stages;
#[cfg(test)]
mod test_pipeline;
mod types;
