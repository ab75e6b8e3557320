//! Martian stages of the demultiplexing pipeline.

pub mod add_snps;
pub mod high_conf_calls;
pub mod reassign_cells;
