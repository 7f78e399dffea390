//! CLI-level error type and the exit-code mapping from §6's CLI surface:
//! 0 success, 1 checked violation, 2 configuration error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Kernel(#[from] agency_shared::KernelError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 2,
            CliError::InvariantViolation(_) => 1,
            CliError::Kernel(_) => 1,
            CliError::Io(_) => 2,
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;
