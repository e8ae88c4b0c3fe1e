//! Error types for msidf.

use std::path::PathBuf;

use msicore::error::CoreError;
use thiserror::Error;

/// Result type alias for msidf operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors raised by storage access, file input/output and the profile pipeline.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// No resolver strategy found the spectrum file of a source.
    #[error("spectrum file of {0} could not be determined")]
    Unresolved(PathBuf),

    /// The spectrum file has no transformed coordinates stored.
    #[error("no transformed coordinates for spectrum file {0}")]
    MissingCoordinates(String),

    /// An input table lacks a required column.
    #[error("{path}: missing column {column}")]
    MissingColumn { path: PathBuf, column: String },

    /// A cell of an input table could not be read as a number.
    #[error("{path}: invalid value {value:?} in column {column}")]
    InvalidValue { path: PathBuf, column: String, value: String },

    /// An element grid has rows of different widths or differs in shape from its folder.
    #[error("{path}: {reason}")]
    InvalidGrid { path: PathBuf, reason: String },

    /// None of the files in a scan folder names an image with fitted maps.
    #[error("no fitted image found in {0}")]
    NoTransformation(PathBuf),

    /// A configuration value is out of range or unknown.
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}
