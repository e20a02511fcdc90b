// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error type used throughout the service.
//!
//! Each error carries a machine-readable [`ErrorKind`], an optional
//! human-readable message, and an optional source error. Construct with the
//! [`err!`](crate::err) and [`bail!`](crate::bail) macros; render the full
//! cause chain in logs with [`Error::chain`].

use std::fmt;

/// Error kind.
///
/// These codes are taken from
/// [grpc::StatusCode](https://github.com/grpc/grpc/blob/0e00c430827e81d61e1e7164ef04ca21ccbfaa77/include/grpcpp/impl/codegen/status_code_enum.h),
/// which is a nice general-purpose classification of errors. See that link for
/// descriptions of each error.
#[derive(Copy, Clone, Eq, PartialEq, Debug, thiserror::Error)]
#[non_exhaustive]
#[rustfmt::skip]
pub enum ErrorKind {
    #[error("Cancelled")] Cancelled,
    #[error("Unknown")] Unknown,
    #[error("Invalid argument")] InvalidArgument,
    #[error("Deadline exceeded")] DeadlineExceeded,
    #[error("Not found")] NotFound,
    #[error("Already exists")] AlreadyExists,
    #[error("Permission denied")] PermissionDenied,
    #[error("Resource exhausted")] ResourceExhausted,
    #[error("Failed precondition")] FailedPrecondition,
    #[error("Aborted")] Aborted,
    #[error("Out of range")] OutOfRange,
    #[error("Unimplemented")] Unimplemented,
    #[error("Internal")] Internal,
    #[error("Unavailable")] Unavailable,
    #[error("Data loss")] DataLoss,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: Option<String>) -> Self {
        Error {
            kind,
            msg,
            source: None,
        }
    }

    /// Wraps another error, keeping it as the source of the returned one.
    pub fn wrap<E: Into<Box<dyn std::error::Error + Send + Sync>>>(kind: ErrorKind, e: E) -> Self {
        Error {
            kind,
            msg: None,
            source: Some(e.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[doc(hidden)]
    pub fn set_source<E: Into<Box<dyn std::error::Error + Send + Sync>>>(mut self, e: E) -> Self {
        self.source = Some(e.into());
        self
    }

    /// Returns a `Display` adapter which writes the full cause chain, for logs.
    pub fn chain(&self) -> ErrorChain<'_> {
        ErrorChain(self)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.msg {
            Some(ref m) => write!(f, "{}: {}", self.kind, m),
            None => fmt::Display::fmt(&self.kind, f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            _ => ErrorKind::Unknown,
        };
        Error::wrap(kind, e)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::wrap(ErrorKind::Internal, e)
    }
}

/// Displays an [`Error`] and all its sources, separated by `: `.
pub struct ErrorChain<'a>(&'a Error);

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self.0, f)?;
        let mut cause = std::error::Error::source(self.0);
        while let Some(c) = cause {
            write!(f, ": {c}")?;
            cause = c.source();
        }
        Ok(())
    }
}

/// Extension methods for `Result`.
pub trait ResultExt<T> {
    /// Annotates an error with the given kind, keeping it as the source.
    fn err_kind(self, k: ErrorKind) -> Result<T, Error>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn err_kind(self, k: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| Error::wrap(k, e))
    }
}

/// Constructs an [`Error`] from an [`ErrorKind`], a `msg(...)` format, and
/// optionally a `source(...)` error.
///
/// ```
/// use skylight_base::{err, ErrorKind};
/// let e = err!(NotFound, msg("no such recording {}", 7));
/// assert_eq!(e.kind(), ErrorKind::NotFound);
/// assert_eq!(e.to_string(), "Not found: no such recording 7");
/// ```
#[macro_export]
macro_rules! err {
    ($k:ident) => {
        $crate::Error::new($crate::ErrorKind::$k, None)
    };
    ($k:ident, msg($($m:tt)*)) => {
        $crate::Error::new($crate::ErrorKind::$k, Some(format!($($m)*)))
    };
    ($k:ident, msg($($m:tt)*), source($s:expr)) => {
        $crate::Error::new($crate::ErrorKind::$k, Some(format!($($m)*))).set_source($s)
    };
}

/// Like [`err!`], but returns the error from the enclosing function.
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::err!($($arg)*).into())
    };
}
