//! Expected-vs-observed timestamp arithmetic.
//!
//! Shared by depth/color pairing (offset = `depth_delay_off_color_usec`) and by
//! cross-device alignment (offset = `subordinate_delay_off_master_usec`, plus the
//! depth delay when comparing depth images).

use contracts::{ContractError, MAX_ALLOWABLE_TIME_OFFSET_ERROR_USEC};

/// Where an observed timestamp falls relative to its expected value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetVerdict {
    /// Observed before the window: the observed stream is behind
    TooEarly,
    InTolerance,
    /// Observed after the window: the reference stream is behind
    TooLate,
}

/// Result of one comparison, all values in device microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetCheck {
    pub expected_usec: i64,
    pub observed_usec: i64,
    /// `observed - expected`
    pub error_usec: i64,
    pub verdict: OffsetVerdict,
}

/// Symmetric tolerance window around an expected timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampModel {
    tolerance_usec: i64,
}

impl Default for TimestampModel {
    fn default() -> Self {
        Self::new(MAX_ALLOWABLE_TIME_OFFSET_ERROR_USEC)
    }
}

impl TimestampModel {
    /// Negative tolerances are treated as their magnitude
    pub const fn new(tolerance_usec: i64) -> Self {
        Self {
            tolerance_usec: tolerance_usec.saturating_abs(),
        }
    }

    pub fn tolerance_usec(&self) -> i64 {
        self.tolerance_usec
    }

    /// Compare `observed` against `reference + offset`.
    ///
    /// Fails with [`ContractError::TimestampOverflow`] instead of wrapping.
    pub fn check(
        &self,
        reference_usec: u64,
        offset_usec: i64,
        observed_usec: u64,
    ) -> Result<OffsetCheck, ContractError> {
        let reference = to_signed(reference_usec)?;
        let observed = to_signed(observed_usec)?;
        let expected = reference.checked_add(offset_usec).ok_or_else(|| {
            overflow(format!("{reference} + {offset_usec}"))
        })?;
        let error = observed
            .checked_sub(expected)
            .ok_or_else(|| overflow(format!("{observed} - {expected}")))?;

        Ok(OffsetCheck {
            expected_usec: expected,
            observed_usec: observed,
            error_usec: error,
            verdict: self.classify(error),
        })
    }

    pub fn classify(&self, error_usec: i64) -> OffsetVerdict {
        if error_usec < -self.tolerance_usec {
            OffsetVerdict::TooEarly
        } else if error_usec > self.tolerance_usec {
            OffsetVerdict::TooLate
        } else {
            OffsetVerdict::InTolerance
        }
    }
}

/// Device timestamp as signed microseconds
pub fn to_signed(ts_usec: u64) -> Result<i64, ContractError> {
    i64::try_from(ts_usec).map_err(|_| overflow(format!("timestamp {ts_usec} exceeds i64")))
}

fn overflow(message: String) -> ContractError {
    ContractError::TimestampOverflow { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_boundaries() {
        let model = TimestampModel::default();
        assert_eq!(model.classify(-51), OffsetVerdict::TooEarly);
        assert_eq!(model.classify(-50), OffsetVerdict::InTolerance);
        assert_eq!(model.classify(0), OffsetVerdict::InTolerance);
        assert_eq!(model.classify(50), OffsetVerdict::InTolerance);
        assert_eq!(model.classify(51), OffsetVerdict::TooLate);
    }

    #[test]
    fn test_expected_includes_offset() {
        let model = TimestampModel::default();
        let check = model.check(33_333, 1_000, 34_333).unwrap();
        assert_eq!(check.expected_usec, 34_333);
        assert_eq!(check.error_usec, 0);
        assert_eq!(check.verdict, OffsetVerdict::InTolerance);

        let check = model.check(33_333, 1_000, 34_133).unwrap();
        assert_eq!(check.error_usec, -200);
        assert_eq!(check.verdict, OffsetVerdict::TooEarly);
    }

    #[test]
    fn test_negative_offset() {
        let model = TimestampModel::new(10);
        let check = model.check(1_000, -160, 845).unwrap();
        assert_eq!(check.expected_usec, 840);
        assert_eq!(check.verdict, OffsetVerdict::InTolerance);
    }

    #[test]
    fn test_overflow_is_reported() {
        let model = TimestampModel::default();
        assert!(matches!(
            model.check(u64::MAX, 0, 0),
            Err(ContractError::TimestampOverflow { .. })
        ));
        assert!(matches!(
            model.check(i64::MAX as u64, 1, 0),
            Err(ContractError::TimestampOverflow { .. })
        ));
        assert!(model.check(i64::MAX as u64, -1, 0).is_ok());
    }

    #[test]
    fn test_negative_tolerance_uses_magnitude() {
        assert_eq!(TimestampModel::new(-20).tolerance_usec(), 20);
    }
}
