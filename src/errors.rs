use std::fmt;

/// Error type shared by the record store and the B-tree engine.
///
/// `Io` carries backing-store failures straight through to the caller (§7
/// `IoError`). `OutOfRange` is raised by the record store when an offset or
/// cell count falls outside the file (§7 `OutOfRange`, an internal-bug
/// class). `Structure` is raised by `check()` on the first invariant
/// violation it finds, and by any operation that hits an impossible
/// configuration mid-flight (§7 `StructureError`). Absence of a key is never
/// an `Error` variant: `search` returns `Option`, `delete` is a silent no-op.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    OutOfRange(String),
    Structure(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error. {}", e),
            Error::OutOfRange(msg) => write!(f, "Out of range. {}", msg),
            Error::Structure(msg) => write!(f, "Structure error. {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

/// Builds an `Error::Variant(format!(...))` without repeating the `format!`
/// boilerplate at every call site, e.g. `err!(Structure, "key {} is reserved", k)`.
macro_rules! err {
    ($variant:ident, $($arg:tt)*) => {
        crate::errors::Error::$variant(format!($($arg)*))
    };
}

pub(crate) use err;
