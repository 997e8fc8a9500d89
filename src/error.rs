use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building the cross-sample locus database.
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// No usable input data. Raised before any engine is invoked.
    #[error("Input error: {message}")]
    Input { message: String },

    /// Malformed clustering or alignment output.
    #[error("Format error: {message}")]
    Format { message: String },

    /// A sample's row overflowed the maximum locus length.
    #[error("Projection error for sample {sample}: {message}")]
    Projection { sample: String, message: String },

    /// Ordering or shape divergence during the sequential merge.
    #[error("Merge error: {message}")]
    Merge { message: String },

    /// An external engine exited unsuccessfully.
    #[error("{program} exited with {status}\nstdout: {stdout}\nstderr: {stderr}")]
    Engine {
        program: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Interrupted")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, AssemblyError>;

impl AssemblyError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    pub fn projection(sample: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Projection {
            sample: sample.into(),
            message: message.into(),
        }
    }

    pub fn merge(message: impl Into<String>) -> Self {
        Self::Merge {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
