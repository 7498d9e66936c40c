use std::io;
use std::result;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    IO(#[from] io::Error),

    /// The underlying container could not be opened or read.
    #[error("{location}: {message}")]
    Source { location: String, message: String },

    /// No variable with this name (or standard/long name) exists in the file.
    #[error("{location}: no variable named {variable:?}")]
    BadName { location: String, variable: String },

    /// The variable's shape doesn't agree with the grid it's meant to be read on.
    #[error("{location}: variable {variable:?} is malformed: {cause}")]
    MalformedField {
        location: String,
        variable: String,
        cause: String,
    },

    /// The requested start time isn't covered by any of the configured files.
    #[error("{variable}: time {time}s is not contained in any dataset file")]
    TimeNotFound { variable: String, time: f64 },

    /// The stack ran out of time ranks in every remaining file.
    #[error("{variable}: no more time ranks available")]
    Exhausted { variable: String },

    #[error("{variable}: field has not been initialized")]
    Uninitialized { variable: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no field factory registered for kind {0:?}")]
    UnknownKind(String),

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = result::Result<T, Error>;
