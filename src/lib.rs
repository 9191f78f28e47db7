pub mod cli;
pub mod config;
pub mod corpus;
pub mod error;
pub mod extractor;
pub mod loader;
pub mod npy;
pub mod pipeline;
pub mod store;
pub mod transform;
mod utils;

pub use config::{ExtractConfig, Opts};
pub use error::{Error, Result};
pub use npy::F16;
pub use pipeline::{Pipeline, Summary};
pub use store::{FeatureArchive, FeatureStore};
