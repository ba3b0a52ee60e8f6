//! Model file access and small shared utilities for sd2_rs.

mod model_source;
mod progress;
mod tokens;

pub use model_source::{FileLoader, ModelSource};
pub use progress::NiceProgressBar;
pub use tokens::{ParseTokenSourceError, TokenError, TokenSource};
