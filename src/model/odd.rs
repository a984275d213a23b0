//! Odds representation
//!
//! The feed prices outcomes as fractions (`numerator/denominator`); some
//! snapshots carry a plain decimal price instead.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Price of an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "camelCase")]
pub enum Odd {
    Fraction { numerator: u32, denominator: u32 },
    Decimal { value: Decimal },
}

impl Odd {
    pub fn fraction(numerator: u32, denominator: u32) -> Self {
        Odd::Fraction {
            numerator,
            denominator,
        }
    }

    /// Decimal price, `1 + n/d` for fractions
    ///
    /// Returns `None` for a fraction with a zero denominator.
    pub fn decimal(&self) -> Option<Decimal> {
        match *self {
            Odd::Fraction {
                numerator,
                denominator,
            } => {
                if denominator == 0 {
                    return None;
                }
                Some(Decimal::ONE + Decimal::from(numerator) / Decimal::from(denominator))
            }
            Odd::Decimal { value } => Some(value),
        }
    }

    /// Apply a partial fraction update
    ///
    /// A side missing from the update keeps its current value. When the
    /// current odd is not a fraction the missing side defaults to `1`.
    pub fn with_fraction_parts(&self, numerator: Option<u32>, denominator: Option<u32>) -> Odd {
        let (current_numerator, current_denominator) = match *self {
            Odd::Fraction {
                numerator,
                denominator,
            } => (numerator, denominator),
            Odd::Decimal { .. } => (1, 1),
        };

        Odd::Fraction {
            numerator: numerator.unwrap_or(current_numerator),
            denominator: denominator.unwrap_or(current_denominator),
        }
    }
}

impl Default for Odd {
    fn default() -> Self {
        Odd::fraction(1, 1)
    }
}
