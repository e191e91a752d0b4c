//! Shared configuration, error taxonomy and value types for oncebuild.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use error::{OncebuildError, Result};
pub use types::{Cause, ParameterValue};
