use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    InvalidKey(&'static str),
    CacheFull,
    NoSpace,
    RegistryFull,
    Integrity(&'static str),
    Unsupported(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::InvalidKey(msg) => write!(f, "invalid key: {msg}"),
            Error::CacheFull => write!(f, "cache full"),
            Error::NoSpace => write!(f, "no space in data segments"),
            Error::RegistryFull => write!(f, "segment registry full"),
            Error::Integrity(msg) => write!(f, "integrity error: {msg}"),
            Error::Unsupported(msg) => write!(f, "unsupported: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
