//! Proof-of-work difficulty derived from the total label count.
//!
//! The dispatcher and every worker derive the same threshold from `numLabels`
//! alone; it is never sent on the wire. The threshold is chosen so that, on
//! average, one label in `numLabels` falls below it:
//!
//! ```text
//! difficulty = floor(2^256 / numLabels)
//! ```
//!
//! encoded as a 32-byte big-endian integer. `numLabels == 1` would need 257
//! bits and saturates to the all-ones value instead.

use crate::{Error, Result};
use core::fmt;

pub const DIFFICULTY_SIZE: usize = 32;

/// A 256-bit big-endian threshold. A candidate value satisfies it when it is
/// strictly below the threshold.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Difficulty(pub [u8; DIFFICULTY_SIZE]);

impl Difficulty {
    pub const fn as_bytes(&self) -> &[u8; DIFFICULTY_SIZE] {
        &self.0
    }

    /// Returns `true` if `value`, read as a big-endian integer, is below the
    /// threshold.
    pub fn is_satisfied_by(&self, value: &[u8; DIFFICULTY_SIZE]) -> bool {
        value < &self.0
    }
}

impl fmt::Debug for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Difficulty(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// Derives the difficulty for a dataset of `num_labels` labels.
///
/// # Errors
///
/// Returns [`Error::ProtocolViolation`] when `num_labels` is zero.
pub fn pow_difficulty(num_labels: u64) -> Result<Difficulty> {
    match num_labels {
        0 => Err(Error::protocol("numLabels must be greater than 0")),
        1 => Ok(Difficulty([0xff; DIFFICULTY_SIZE])),
        divisor => {
            // Long division of 2^256 (a one followed by 32 zero bytes) by the
            // divisor, one base-256 digit at a time. The leading digit's
            // quotient is zero for any divisor above one.
            let divisor = u128::from(divisor);
            let mut remainder: u128 = 1;
            let mut quotient = [0_u8; DIFFICULTY_SIZE];
            for digit in &mut quotient {
                let current = remainder << 8;
                *digit = (current / divisor) as u8;
                remainder = current % divisor;
            }
            Ok(Difficulty(quotient))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_labels_is_rejected() {
        assert!(matches!(
            pow_difficulty(0),
            Err(Error::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn single_label_saturates() {
        assert_eq!(pow_difficulty(1).unwrap().0, [0xff; 32]);
    }

    #[test]
    fn powers_of_two_shift_the_leading_bit() {
        let mut expected = [0_u8; 32];
        expected[0] = 0x80;
        assert_eq!(pow_difficulty(2).unwrap().0, expected);

        let mut expected = [0_u8; 32];
        expected[1] = 0x01;
        assert_eq!(pow_difficulty(1 << 16).unwrap().0, expected);
    }

    #[test]
    fn non_powers_of_two_are_floored() {
        // 3 * 0x5555...55 == 2^256 - 1
        assert_eq!(pow_difficulty(3).unwrap().0, [0x55; 32]);

        let difficulty = pow_difficulty(1024).unwrap();
        let mut expected = [0_u8; 32];
        expected[1] = 0x40;
        assert_eq!(difficulty.0, expected);
    }

    #[test]
    fn large_divisors_do_not_overflow() {
        let difficulty = pow_difficulty(u64::MAX).unwrap();
        // 2^256 / (2^64 - 1) is just above 2^192.
        assert_eq!(&difficulty.0[..7], &[0; 7]);
        assert_eq!(difficulty.0[7], 0x01);
    }

    #[test]
    fn satisfaction_is_strictly_below() {
        let difficulty = pow_difficulty(2).unwrap();
        let mut below = [0xff_u8; 32];
        below[0] = 0x7f;
        assert!(difficulty.is_satisfied_by(&below));
        assert!(!difficulty.is_satisfied_by(difficulty.as_bytes()));
        assert!(!difficulty.is_satisfied_by(&[0xff; 32]));
    }
}
