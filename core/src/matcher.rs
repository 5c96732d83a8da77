//! Distance threshold policy shared by enrollment and identification.
//!
//! Both paths compare against the same threshold, but with different strict
//! comparisons: a probe exactly at the threshold is not a duplicate at
//! enrollment time, yet it is a match at query time.

use thiserror::Error;

use crate::index::Neighbor;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("match threshold must be finite and >= 0, got {0}")]
    InvalidThreshold(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnrollDecision {
    Unique,
    Duplicate(Neighbor),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryDecision {
    Match(Neighbor),
    NoMatch,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    threshold: f32,
}

impl MatchPolicy {
    /// `threshold` is in squared L2 distance units.
    pub fn new(threshold: f32) -> Result<Self, PolicyError> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(PolicyError::InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Rejects enrollment when the nearest entry is strictly closer than the threshold.
    pub fn enrollment_decision(&self, nearest: Option<Neighbor>) -> EnrollDecision {
        match nearest {
            Some(neighbor) if neighbor.distance < self.threshold => {
                EnrollDecision::Duplicate(neighbor)
            }
            _ => EnrollDecision::Unique,
        }
    }

    /// Accepts the nearest entry unless it is strictly farther than the threshold.
    pub fn query_decision(&self, nearest: Option<Neighbor>) -> QueryDecision {
        match nearest {
            Some(neighbor) if neighbor.distance <= self.threshold => QueryDecision::Match(neighbor),
            _ => QueryDecision::NoMatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbor(distance: f32) -> Option<Neighbor> {
        Some(Neighbor {
            identity: 7,
            distance,
        })
    }

    #[test]
    fn rejects_invalid_thresholds() {
        assert!(MatchPolicy::new(f32::NAN).is_err());
        assert!(MatchPolicy::new(f32::INFINITY).is_err());
        assert!(MatchPolicy::new(-0.1).is_err());
        assert_eq!(MatchPolicy::new(0.8).expect("valid").threshold(), 0.8);
    }

    #[test]
    fn empty_result_is_unique_and_no_match() {
        let policy = MatchPolicy::new(0.8).expect("valid");
        assert_eq!(policy.enrollment_decision(None), EnrollDecision::Unique);
        assert_eq!(policy.query_decision(None), QueryDecision::NoMatch);
    }

    #[test]
    fn distance_at_threshold_is_enrollable_but_matches() {
        let policy = MatchPolicy::new(0.8).expect("valid");

        assert_eq!(
            policy.enrollment_decision(neighbor(0.8)),
            EnrollDecision::Unique
        );
        assert!(matches!(
            policy.query_decision(neighbor(0.8)),
            QueryDecision::Match(Neighbor { identity: 7, .. })
        ));
    }

    #[test]
    fn below_threshold_is_duplicate_and_match() {
        let policy = MatchPolicy::new(0.8).expect("valid");
        assert!(matches!(
            policy.enrollment_decision(neighbor(0.0)),
            EnrollDecision::Duplicate(_)
        ));
        assert!(matches!(
            policy.query_decision(neighbor(0.79)),
            QueryDecision::Match(_)
        ));
    }

    #[test]
    fn above_threshold_is_unique_and_no_match() {
        let policy = MatchPolicy::new(0.8).expect("valid");
        assert_eq!(
            policy.enrollment_decision(neighbor(0.81)),
            EnrollDecision::Unique
        );
        assert_eq!(policy.query_decision(neighbor(0.81)), QueryDecision::NoMatch);
    }
}
