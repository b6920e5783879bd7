pub mod materializer;

pub use materializer::{materialize_relations, RelationOptions};
