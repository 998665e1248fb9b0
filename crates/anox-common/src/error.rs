// error.rs -- load error model
//
// Two severities exist in this engine. A *drop* error means a file the
// engine assumes trustworthy violated a format, version, or size
// constraint; the current load is abandoned and the caller (the boot
// sequence, usually) decides whether to shut the process down.
// Recoverable conditions -- a file that simply is not there, a texture
// name that resolves to nothing -- are not errors at all: they surface
// as `None` plus a single logged warning, and the caller substitutes a
// safe default.

use std::fmt;

/// Fatal load failure. Carries only a message, like the old
/// `ERR_DROP` path did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropError {
    msg: String,
}

impl DropError {
    pub fn new(msg: impl Into<String>) -> Self {
        DropError { msg: msg.into() }
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl fmt::Display for DropError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for DropError {}

pub type DropResult<T> = Result<T, DropError>;

/// Shorthand for `Err(DropError::new(format!(..)))`.
#[macro_export]
macro_rules! drop_error {
    ($($arg:tt)*) => {
        return Err($crate::error::DropError::new(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_error_message() {
        let e = DropError::new("funny lump size in maps/demo1.bsp");
        assert_eq!(e.message(), "funny lump size in maps/demo1.bsp");
        assert_eq!(format!("{}", e), "funny lump size in maps/demo1.bsp");
    }

    fn failing(n: i32) -> DropResult<i32> {
        if n < 0 {
            drop_error!("bad count {}", n);
        }
        Ok(n)
    }

    #[test]
    fn test_drop_error_macro() {
        assert_eq!(failing(3).unwrap(), 3);
        let err = failing(-1).unwrap_err();
        assert_eq!(err.message(), "bad count -1");
    }
}
