//! Model files and label tables

pub mod labels;
pub mod store;

pub use labels::{load_labels, parse_labels};
pub use store::{ModelSource, ModelStore};
