// src/lib.rs
pub mod candidate_generation;
pub mod embedding;
pub mod error;
pub mod matching;
pub mod models;
pub mod pipeline;
pub mod relations;
pub mod report;
pub mod store;
pub mod utils;
