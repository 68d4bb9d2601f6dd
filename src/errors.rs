use std::io;
use std::process;

use thiserror::Error;

/// BSD sysexits codes used by the classify front end.
pub const EX_USAGE: i32 = 64;
pub const EX_DATAERR: i32 = 65;
pub const EX_OSERR: i32 = 71;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("{0}")]
    Usage(String),

    #[error("{0}")]
    Data(String),

    #[error("{0}")]
    Os(String),

    #[error("{0}")]
    Io(#[from] io::Error),
}

impl ClassifyError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ClassifyError::Usage(_) => EX_USAGE,
            ClassifyError::Data(_) => EX_DATAERR,
            ClassifyError::Os(_) | ClassifyError::Io(_) => EX_OSERR,
        }
    }
}

pub type ClassifyResult<T> = Result<T, ClassifyError>;

/// Print the error and terminate with its exit code. Used on paths that
/// cannot propagate, e.g. inside worker threads holding the output lock.
pub fn fatal(err: ClassifyError) -> ! {
    eprintln!("classify: {}", err);
    process::exit(err.exit_code());
}
