pub mod align_driver;
pub mod cli;
pub mod cluster_reconstruct;
pub mod clustering;
pub mod constants;
pub mod database;
pub mod error;
pub mod gap_rows;
pub mod input_assembler;
pub mod msa;
pub mod pipeline;
pub mod projector;
pub mod seq_parse;
pub mod types;
pub mod utils;
