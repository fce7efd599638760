use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Signed amount held as an integer count of minor units (cents for a
/// two-decimal currency).
///
/// All balance accumulation happens in this type so that thousands of small
/// debits cannot drift. Conversion to and from [`Decimal`] is explicit and
/// takes the number of decimal places of the minor unit. Arithmetic is
/// checked: sums that leave the `i64` range come back as `None`.
///
/// # Examples
///
/// ```
/// use trip_ledger::core::money::MinorUnits;
/// use rust_decimal_macros::dec;
///
/// let cents = MinorUnits::from_decimal(dec!(12.345), 2).unwrap();
/// assert_eq!(cents.value(), 1235);
/// assert_eq!(cents.to_decimal(2), dec!(12.35));
/// assert!(MinorUnits::new(i64::MAX).checked_add(cents).is_none());
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MinorUnits(i64);

impl MinorUnits {
    pub const ZERO: MinorUnits = MinorUnits(0);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }

    /// Round `amount` to `decimal_places` (midpoint away from zero) and
    /// express it in minor units. `None` when the result does not fit.
    pub fn from_decimal(amount: Decimal, decimal_places: u32) -> Option<Self> {
        let scaled = amount.checked_mul(Decimal::from(10i64.checked_pow(decimal_places)?))?;
        scaled
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .filter(|v| *v != i64::MIN)
            .map(Self)
    }

    pub fn to_decimal(self, decimal_places: u32) -> Decimal {
        Decimal::new(self.0, decimal_places)
    }

    pub fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Sum of `values`, or `None` on overflow.
    pub fn checked_sum(values: impl IntoIterator<Item = Self>) -> Option<Self> {
        values
            .into_iter()
            .try_fold(Self::ZERO, |acc, v| acc.checked_add(v))
    }
}

impl fmt::Display for MinorUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Split `total` into `parts` amounts that differ by at most one unit and
/// sum exactly to `total`. The leftover units go to the earliest parts.
pub fn split_even(total: MinorUnits, parts: usize) -> Vec<MinorUnits> {
    if parts == 0 {
        return Vec::new();
    }
    let n = parts as i64;
    let base = total.0 / n;
    let remainder = total.0 % n;
    let step = remainder.signum();
    (0..n)
        .map(|i| {
            if i < remainder.abs() {
                MinorUnits(base + step)
            } else {
                MinorUnits(base)
            }
        })
        .collect()
}

/// Distribute `total` proportionally to `weights` with the largest-remainder
/// method. The result sums exactly to `total`; remainder ties go to the
/// earlier weight.
///
/// Returns `None` if any weight is negative, if the weights sum to zero
/// while `total` does not, or if an intermediate product overflows.
pub fn apportion(total: MinorUnits, weights: &[Decimal]) -> Option<Vec<MinorUnits>> {
    if weights.iter().any(|w| w.is_sign_negative() && !w.is_zero()) {
        return None;
    }
    let weight_sum = weights
        .iter()
        .try_fold(Decimal::ZERO, |acc, w| acc.checked_add(*w))?;
    if weight_sum.is_zero() {
        return if total.is_zero() {
            Some(vec![MinorUnits::ZERO; weights.len()])
        } else {
            None
        };
    }

    let total_dec = Decimal::from(total.0);
    let mut shares = Vec::with_capacity(weights.len());
    let mut remainders = Vec::with_capacity(weights.len());
    for weight in weights {
        let exact = total_dec.checked_mul(*weight)?.checked_div(weight_sum)?;
        let floor = exact.trunc();
        shares.push(floor.to_i64()?);
        remainders.push((exact - floor).abs());
    }

    let assigned = shares.iter().try_fold(0i64, |acc, v| acc.checked_add(*v))?;
    distribute_leftover(&mut shares, &remainders, total.0.checked_sub(assigned)?)?;
    Some(shares.into_iter().map(MinorUnits).collect())
}

/// Round signed `values` to minor units so that the results sum to exactly
/// zero, moving each value by less than one unit whenever the values
/// themselves sum to less than one unit.
///
/// Each value is floored, then the units needed to bring the sum back to
/// zero go to the largest fractional parts (ties to the earlier value).
/// `None` if a value does not fit.
pub fn round_to_zero_sum(values: &[Decimal], decimal_places: u32) -> Option<Vec<MinorUnits>> {
    let scale = Decimal::from(10i64.checked_pow(decimal_places)?);
    let mut floors = Vec::with_capacity(values.len());
    let mut fractions = Vec::with_capacity(values.len());
    for value in values {
        let scaled = value.checked_mul(scale)?;
        let floor = scaled.floor();
        floors.push(floor.to_i64().filter(|v| *v != i64::MIN)?);
        fractions.push(scaled - floor);
    }
    let assigned = floors.iter().try_fold(0i64, |acc, v| acc.checked_add(*v))?;
    let leftover = assigned.checked_neg()?;
    // taking a unit away favours the values that were floored the least
    let priorities: Vec<Decimal> = if leftover < 0 {
        fractions.iter().map(|f| Decimal::ONE - f).collect()
    } else {
        fractions
    };
    distribute_leftover(&mut floors, &priorities, leftover)?;
    Some(floors.into_iter().map(MinorUnits).collect())
}

/// Hand out `leftover` units in the direction of its sign, as evenly as
/// possible, with the odd units going to the largest `priorities` first.
fn distribute_leftover(shares: &mut [i64], priorities: &[Decimal], leftover: i64) -> Option<()> {
    if shares.is_empty() {
        return if leftover == 0 { Some(()) } else { None };
    }
    let n = shares.len() as i64;
    let each = leftover / n;
    let odd = leftover % n;
    let step = odd.signum();
    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|a, b| priorities[*b].cmp(&priorities[*a]).then(a.cmp(b)));
    for (rank, idx) in order.into_iter().enumerate() {
        let extra = if (rank as i64) < odd.abs() { step } else { 0 };
        shares[idx] = shares[idx].checked_add(each)?.checked_add(extra)?;
    }
    Some(())
}
