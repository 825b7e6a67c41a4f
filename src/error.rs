//! Error types.
//!
//! - `FitError` is the library error. Every variant has a stable integer code so
//!   the C boundary can return it unchanged.
//! - `AppError` is the binary's error: a message plus a process exit code.

use thiserror::Error;

/// Errors raised by the fitting engines and their input validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("invalid fit window: {0}")]
    InvalidWindow(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid noise specification: {0}")]
    InvalidNoise(String),
    #[error("invalid instrument response: {0}")]
    InvalidInstrument(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("no decaying signal in fit window (integral ratio {ratio})")]
    NoDecay { ratio: f64 },
    #[error("singular system: {0}")]
    Singular(String),
    #[error("null pointer passed for `{0}`")]
    NullPointer(&'static str),
    #[error("internal error: {0}")]
    Internal(String),
}

impl FitError {
    /// Status code returned across the C boundary. Always negative.
    pub fn code(&self) -> i32 {
        match self {
            FitError::InvalidWindow(_) => -1,
            FitError::InvalidInput(_) => -2,
            FitError::InvalidNoise(_) => -3,
            FitError::InvalidInstrument(_) => -4,
            FitError::InvalidParameters(_) => -5,
            FitError::InsufficientData(_) => -6,
            FitError::NoDecay { .. } => -7,
            FitError::Singular(_) => -8,
            FitError::NullPointer(_) => -9,
            FitError::Internal(_) => -99,
        }
    }
}

pub type FitResult<T> = Result<T, FitError>;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let exit_code = match err {
            FitError::InvalidWindow(_)
            | FitError::InvalidInput(_)
            | FitError::InvalidNoise(_)
            | FitError::InvalidInstrument(_)
            | FitError::InvalidParameters(_)
            | FitError::NullPointer(_) => 2,
            FitError::InsufficientData(_) => 3,
            FitError::NoDecay { .. } | FitError::Singular(_) | FitError::Internal(_) => 4,
        };
        AppError::new(exit_code, format!("Fit failed: {err}"))
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
