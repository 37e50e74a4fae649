//! Opinion algebra for layer vote tallying
//!
//! An opinion is the pair `(for, against)`. Tallying sums opinions over
//! many voters; thresholding the sums yields the three-valued verdict a
//! pattern holds about a block.
//!
//! Every operation returns a fresh value. The canonical `SUPPORT`,
//! `AGAINST` and `ABSTAIN` constants are shared across the whole engine and
//! must never be written through.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Neg};

/// Two-component opinion vector `(for, against)`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Opinion([i64; 2]);

impl Opinion {
    /// One vote in favor
    pub const SUPPORT: Opinion = Opinion([1, 0]);

    /// One vote against
    pub const AGAINST: Opinion = Opinion([0, 1]);

    /// No stance; the additive identity
    pub const ABSTAIN: Opinion = Opinion([0, 0]);

    /// Create an opinion from raw components
    pub const fn new(support: i64, against: i64) -> Self {
        Self([support, against])
    }

    /// Accumulated votes in favor
    pub const fn support(&self) -> i64 {
        self.0[0]
    }

    /// Accumulated votes against
    pub const fn against(&self) -> i64 {
        self.0[1]
    }

    /// Threshold the accumulated components into a verdict.
    ///
    /// The favor component is checked first; a tally where both components
    /// clear the threshold resolves to support.
    pub const fn verdict(&self, threshold: i64) -> Verdict {
        if self.0[0] > threshold {
            Verdict::Support
        } else if self.0[1] > threshold {
            Verdict::Against
        } else {
            Verdict::Abstain
        }
    }
}

impl Add for Opinion {
    type Output = Opinion;

    fn add(self, rhs: Opinion) -> Opinion {
        Opinion([self.0[0] + rhs.0[0], self.0[1] + rhs.0[1]])
    }
}

impl Neg for Opinion {
    type Output = Opinion;

    fn neg(self) -> Opinion {
        Opinion([-self.0[0], -self.0[1]])
    }
}

impl Mul<i64> for Opinion {
    type Output = Opinion;

    fn mul(self, rhs: i64) -> Opinion {
        Opinion([self.0[0] * rhs, self.0[1] * rhs])
    }
}

impl fmt::Debug for Opinion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0[0], self.0[1])
    }
}

impl fmt::Display for Opinion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0[0], self.0[1])
    }
}

/// Three-valued global opinion of a pattern about a block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// The block belongs to the agreed history
    Support,
    /// The block is rejected
    Against,
    /// The tally has not crossed either threshold
    Abstain,
}

impl Verdict {
    /// True for Support and Against
    pub const fn is_decided(&self) -> bool {
        !matches!(self, Verdict::Abstain)
    }

    /// The unit opinion this verdict contributes when inherited
    pub const fn as_opinion(&self) -> Opinion {
        match self {
            Verdict::Support => Opinion::SUPPORT,
            Verdict::Against => Opinion::AGAINST,
            Verdict::Abstain => Opinion::ABSTAIN,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Support => "support",
            Verdict::Against => "against",
            Verdict::Abstain => "abstain",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addition_is_component_wise() {
        let a = Opinion::new(3, 1);
        let b = Opinion::new(2, 5);
        assert_eq!(a + b, Opinion::new(5, 6));
    }

    #[test]
    fn test_abstain_is_additive_identity() {
        let a = Opinion::new(7, -2);
        assert_eq!(a + Opinion::ABSTAIN, a);
        assert_eq!(Opinion::ABSTAIN + a, a);
    }

    #[test]
    fn test_negation_returns_fresh_value() {
        let support = Opinion::SUPPORT;
        let negated = -support;

        assert_eq!(negated, Opinion::new(-1, 0));
        // the shared constant is untouched
        assert_eq!(support, Opinion::new(1, 0));
        assert_eq!(Opinion::SUPPORT, Opinion::new(1, 0));
    }

    #[test]
    fn test_scaling_returns_fresh_value() {
        let against = Opinion::AGAINST;
        assert_eq!(against * 4, Opinion::new(0, 4));
        assert_eq!(Opinion::AGAINST, Opinion::new(0, 1));
        assert_eq!(against * 0, Opinion::ABSTAIN);
    }

    #[test]
    fn test_verdict_thresholds_are_strict() {
        assert_eq!(Opinion::new(4, 0).verdict(4), Verdict::Abstain);
        assert_eq!(Opinion::new(5, 0).verdict(4), Verdict::Support);
        assert_eq!(Opinion::new(0, 5).verdict(4), Verdict::Against);
        assert_eq!(Opinion::new(2, 2).verdict(4), Verdict::Abstain);
        // favor wins when both components clear the bar
        assert_eq!(Opinion::new(6, 5).verdict(4), Verdict::Support);
    }

    #[test]
    fn test_verdict_opinion_units() {
        assert_eq!(Verdict::Support.as_opinion(), Opinion::SUPPORT);
        assert_eq!(Verdict::Against.as_opinion(), Opinion::AGAINST);
        assert_eq!(Verdict::Abstain.as_opinion(), Opinion::ABSTAIN);
        assert!(Verdict::Support.is_decided());
        assert!(!Verdict::Abstain.is_decided());
    }
}
