pub mod activity_vectors;

pub use activity_vectors::prepare_activity_vectors;
