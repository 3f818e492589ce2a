/*
    espectrum-core: ZX Spectrum family timing and hardware emulation core.
    Copyright (C) 2019-2024  Rafal Michalski

    For the full copyright notice, see the lib.rs file.
*/
//! Media and configuration errors.
use core::fmt;

#[cfg(feature = "std")]
use std::io;

/// The error type returned when loading media or installing ROMs fails.
///
/// Emulated chips never return errors; protocol failures are reported through
/// their status registers instead.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occured while reading a file.
    #[cfg(feature = "std")]
    Io(io::Error),
    /// The resource could not be found.
    NotFound,
    /// The data is not in the expected format.
    InvalidFormat(&'static str),
    /// A drive unit or a ROM slot out of range.
    InvalidUnit(usize),
}

/// A specialized result type for media operations.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "std")]
            Error::Io(err) => err.fmt(f),
            Error::NotFound => f.write_str("resource not found"),
            Error::InvalidFormat(msg) => write!(f, "invalid format: {}", msg),
            Error::InvalidUnit(unit) => write!(f, "invalid unit: {}", unit),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None
        }
    }
}

#[cfg(feature = "std")]
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Error::NotFound,
            _ => Error::Io(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_works() {
        assert_eq!(Error::NotFound.to_string(), "resource not found");
        assert_eq!(Error::InvalidFormat("unknown disk type").to_string(),
                   "invalid format: unknown disk type");
        assert_eq!(Error::InvalidUnit(7).to_string(), "invalid unit: 7");
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "nope").into();
        assert!(matches!(err, Error::NotFound));
        let err: Error = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
