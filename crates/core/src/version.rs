//! Optimistic concurrency expectation for cost state.

use crate::error::{CostingError, CostingResult};

/// Expected version of a (product, location) cost bucket.
///
/// Every mutation of a bucket bumps its version by one. A caller that read
/// state, decided, and now writes can pass `Exact(v)` to detect a concurrent
/// writer; the loser receives a conflict and retries.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (useful when the caller holds its own lock).
    Any,
    /// Require the bucket to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> CostingResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(CostingError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_everything() {
        assert!(ExpectedVersion::Any.matches(0));
        assert!(ExpectedVersion::Any.matches(42));
    }

    #[test]
    fn exact_mismatch_is_conflict() {
        assert!(ExpectedVersion::Exact(3).check(3).is_ok());
        let err = ExpectedVersion::Exact(3).check(4).unwrap_err();
        assert!(matches!(err, CostingError::Conflict(_)));
    }
}
