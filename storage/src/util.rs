//! Small utility functions, grounded on the teacher's `utils/src/util.rs`
//! (`get_timestamp`, `log2`, `ByteSize`) and generalized with the
//! division helper the teacher's `mkfs/src/ext2.rs` imports from it.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Returns the current timestamp since the Unix epoch.
pub fn get_timestamp() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
}

/// Ceiling division: `ceil(n / d)`.
pub fn ceil_division(n: u64, d: u64) -> u64 {
    (n + d - 1) / d
}

/// `log2(n)`, or `None` if `n == 0`.
pub fn log2(n: u64) -> Option<u64> {
    let num_bits = (std::mem::size_of::<u64>() * 8) as u64;
    let n = num_bits - n.leading_zeros() as u64;
    if n > 0 {
        Some(n - 1)
    } else {
        None
    }
}

/// `2^n`.
pub fn pow2(n: u32) -> u64 {
    1u64 << n
}

/// A number of bytes, rendered with a binary-prefix suffix.
pub struct ByteSize(pub u64);

impl fmt::Display for ByteSize {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut order = log2(self.0).unwrap_or(0) / log2(1024).unwrap();

        let suffix = match order {
            0 => "bytes",
            1 => "KiB",
            2 => "MiB",
            3 => "GiB",
            4 => "TiB",
            5 => "PiB",
            6 => "EiB",
            _ => {
                order = 0;
                "bytes"
            }
        };

        let unit = 1024u64.pow(order as u32);
        write!(fmt, "{} {}", self.0 / unit, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytesize() {
        assert_eq!(format!("{}", ByteSize(0)), "0 bytes");
        assert_eq!(format!("{}", ByteSize(1023)), "1023 bytes");
        assert_eq!(format!("{}", ByteSize(1024)), "1 KiB");
        assert_eq!(format!("{}", ByteSize(1024 * 1024)), "1 MiB");
        assert_eq!(format!("{}", ByteSize(1024 * 1024 * 1024)), "1 GiB");
    }

    #[test]
    fn ceil_div() {
        assert_eq!(ceil_division(0, 8), 0);
        assert_eq!(ceil_division(1, 8), 1);
        assert_eq!(ceil_division(8, 8), 1);
        assert_eq!(ceil_division(9, 8), 2);
    }
}
