//! Common utility functions and types.

use std::i64;
use std::mem::size_of;
use crate::error::{ Error, ErrorKind, Result };

/// Converts an `i8`, `i16`, `i32` or `i64` to a `usize` if the range and
/// the value permits. Constructs an error message based on `msg` otherwise.
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation, clippy::if_same_then_else)]
pub fn int_to_usize_with_msg<T: Into<i64>>(x: T, msg: &str) -> Result<usize> {
    use std::usize;

    let n: i64 = x.into();

    // XXX: the correctness of this usize -> i64 cast relies on the following:
    // 1. if `sizeof(usize) >= sizeof(i64)`, i.e. 64-bit and wider word size
    //    platforms (the typical), then `i64::MAX` always fits into a `usize`,
    //    therefore the cast `n as usize` is safe as long as `n >= 0`.
    // 2. Otherwise, if `sizeof(usize) < sizeof(i64)`, eg. 32-bit architectures,
    //    then we can safely cast `usize::MAX` to `i64` in order to find out
    //    via comparison whether the actual `i64` value fits dynamically.
    if n < 0 {
        Err(Error::new(
            ErrorKind::IntConversionUnderflow,
            format!("{} ({}) is negative", msg, n)
        ))
    } else if size_of::<usize>() >= size_of::<i64>() {
        Ok(n as usize)
    } else if n <= usize::MAX as i64 {
        Ok(n as usize)
    } else {
        Err(Error::new(
            ErrorKind::IntConversionOverflow,
            format!("{} ({}) overflows `usize`", msg, n)
        ))
    }
}

/// Converts a `u64` (e.g. a page offset or size) to the `i64` the wire
/// protocol expects, saturating at `i64::MAX`. Offsets and sizes that
/// large already select every document there is.
#[allow(clippy::cast_possible_wrap)]
pub fn u64_to_i64_saturating(x: u64) -> i64 {
    if x <= i64::MAX as u64 {
        x as i64
    } else {
        i64::MAX
    }
}

#[cfg(test)]
mod tests {
    use std::{ i64, u64 };
    use crate::error::{ ErrorExt, ErrorKind, Result };
    use super::*;

    #[test]
    fn usize_conversion() -> Result<()> {
        assert_eq!(int_to_usize_with_msg(1, "example value")?, 1);
        assert_eq!(int_to_usize_with_msg(-1_i32, "example value").unwrap_err().kind(),
                   ErrorKind::IntConversionUnderflow);
        assert!(int_to_usize_with_msg(-1_i32, "example value")
                .unwrap_err()
                .to_string()
                .contains("example value (-1) is negative"));
        Ok(())
    }

    #[test]
    fn i64_conversion_saturates() {
        assert_eq!(u64_to_i64_saturating(42), 42);
        assert_eq!(u64_to_i64_saturating(i64::MAX as u64), i64::MAX);
        assert_eq!(u64_to_i64_saturating(u64::MAX), i64::MAX);
    }
}
