// databanka - question bank PDF to validated quiz dataset
pub mod assembler;
pub mod associator;
pub mod config;
pub mod pdf_extraction;
pub mod pipeline;
pub mod segmenter;
pub mod store;
pub mod types;
pub mod validator;

pub use config::Config;
pub use types::{DatabankaError, Dataset, Result, Severity};
