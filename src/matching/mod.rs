pub mod engine;
pub mod normalize;
pub mod similarity;
