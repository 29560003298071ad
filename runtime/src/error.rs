//! Error model. `spec.md` §7 describes a POSIX-errno-shaped result: "every
//! operation returns a success/failure indicator and, on failure, sets a
//! thread-local error code". Rust's `Result` already carries the failure to
//! the caller, so there is no separate thread-local errno; `RtError`'s
//! variants are the errno classes from the spec's table.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RtError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("resource busy")]
    Busy,
    #[error("would deadlock")]
    Deadlock,
    #[error("no such thread, port or primitive")]
    NoSuch,
    #[error("interrupted by an extra event")]
    Interrupted,
    #[error("bad file descriptor")]
    BadFd,
    #[error("out of memory")]
    OutOfMemory,
    #[error("fatal runtime invariant violated")]
    Fatal,
}

pub type RtResult<T> = Result<T, RtError>;
