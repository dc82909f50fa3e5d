pub mod client;
pub mod epub;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod templates;
pub mod transform;

pub use client::WattpadClient;
pub use error::{ErrorKind, Result, WattbookError};
pub use pipeline::{download_story, run_pipeline, Credentials};
