//! Internal helper macros.

/// Returns early with an error if a condition is not met.
///
/// Like `assert!`, but produces `Err($error)` from the enclosing function instead of panicking.
///
/// ```ignore
/// ensure!(written != 0, BodyError::sink(io::Error::from(io::ErrorKind::WriteZero)));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
