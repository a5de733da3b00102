use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the analysis engine and its persistence layer.
///
/// Numeric leaf modules report with `anyhow`; those errors are wrapped here
/// together with the batch, pixel or recipe they came from.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Axis names {found:?} do not match the constructor parameters {expected:?}.")]
    AxisMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("Axis \"{0}\" has no values.")]
    EmptyAxis(String),
    #[error("Time step must be positive, got {0}.")]
    NonPositiveTimeStep(f64),
    #[error("Step count must be positive.")]
    NonPositiveSteps,
    #[error("Chunksize must satisfy 0 < chunksize < {size}, got {chunksize}.")]
    InvalidChunksize { chunksize: usize, size: usize },
    #[error("Unknown backend \"{0}\". Expected one of: leapfrog, rk4, tsit5.")]
    UnknownBackend(String),
    #[error("Invalid {what} recipe.")]
    InvalidRecipe {
        what: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("No backend accepts the potential ({0}).")]
    UnresolvedPotential(String),
    #[error("Backend resolution is ambiguous between {0:?}.")]
    AmbiguousBackend(Vec<String>),

    #[error("Integration failed in batch {batch}.")]
    Integration {
        batch: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("Backend returned {found} orbits for a batch of {expected}.")]
    BackendOutputMismatch { expected: usize, found: usize },
    #[error("Evaluation failed at pixel {pixel:?}.")]
    Evaluation {
        pixel: Vec<usize>,
        #[source]
        source: anyhow::Error,
    },
    #[error("Initial conditions could not be built at pixel {pixel:?}.")]
    Expansion {
        pixel: Vec<usize>,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error on {}.", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode the container.")]
    Encode(#[source] bincode::Error),
    #[error("Failed to decode the container.")]
    Decode(#[source] bincode::Error),
    #[error("Container is not a commensurability image (format {format:?}, version {version}).")]
    UnsupportedContainer { format: String, version: u32 },
    #[error("Container has no dataset named \"{0}\".")]
    MissingDataset(String),
    #[error("Dataset is missing the \"{0}\" attribute.")]
    MissingAttribute(String),
    #[error("Attribute \"{0}\" has an unexpected type.")]
    AttributeType(String),
    #[error("Axis name \"{0}\" collides with a reserved metadata key.")]
    ReservedAxisName(String),
    #[error("Stored image has shape {found:?}, expected {expected:?}.")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

impl AnalysisError {
    /// True for errors caused by the arguments of a construction, raised
    /// before any integration work starts.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AnalysisError::AxisMismatch { .. }
                | AnalysisError::EmptyAxis(_)
                | AnalysisError::NonPositiveTimeStep(_)
                | AnalysisError::NonPositiveSteps
                | AnalysisError::InvalidChunksize { .. }
                | AnalysisError::UnknownBackend(_)
                | AnalysisError::InvalidRecipe { .. }
        )
    }

    /// True for implicit backend resolution failures.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            AnalysisError::UnresolvedPotential(_) | AnalysisError::AmbiguousBackend(_)
        )
    }
}

pub type AnalysisResult<T> = std::result::Result<T, AnalysisError>;
