use serde::{Deserialize, Serialize};

pub type E = f64;
pub type I = usize;

pub mod activeset;
pub mod callback;
pub mod cobyla;
pub mod eval;
pub mod linalg;

#[cfg(test)]
pub mod tests;

/// Values beyond this magnitude are treated as effectively infinite.
pub(crate) const HUGENUM: E = 1e300;

/// Outcome codes for the solver family.
///
/// The numeric catalog is shared by every solver stage; `code` reports the
/// conventional integer. Not every variant is reachable from every solver:
/// COBYLA emits `SmallTrustRadius`, `TargetAchieved`, `TrustRegionFailure`,
/// `MaxFunReached`, `DamagingRounding`, `ZeroConstraintGradient`, `NanInX`
/// and `NanInfF`; the remaining codes belong to the bounded and
/// quadratic-model members of the family.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    /// The solver is still running.
    InProgress,
    /// The final trust-region radius was reached.
    SmallTrustRadius,
    /// A feasible point with `f <= ftarget` was found.
    TargetAchieved,
    /// The trust-region step failed to reduce the model.
    TrustRegionFailure,
    /// The evaluation budget was exhausted.
    MaxFunReached,
    /// Cancellation occurred in a denominator.
    DenominatorCancellation,
    /// The number of interpolation points is out of range.
    NptOutOfRange,
    /// The gap between the variable bounds is below `2 * rhobeg`.
    BoundGapTooSmall,
    /// Rounding errors are becoming damaging.
    DamagingRounding,
    /// Rounding prevents any change to the iterate.
    RoundingPreventsStep,
    /// A denominator in the update formula is zero.
    ZeroDenominator,
    /// The dimension is below the minimum the method supports.
    DimensionTooSmall,
    /// The evaluation budget cannot cover the initial interpolation set.
    MaxFunTooSmall,
    /// A violated constraint has a zero model gradient.
    ZeroConstraintGradient,
    /// The iterate contains NaN entries.
    NanInX,
    /// The objective evaluated to NaN or a near-infinite value.
    NanInfF,
}

impl Status {
    /// The conventional integer code, or `None` while the solver is running.
    pub fn code(self) -> Option<i32> {
        match self {
            Status::InProgress => None,
            Status::SmallTrustRadius => Some(0),
            Status::TargetAchieved => Some(1),
            Status::TrustRegionFailure => Some(2),
            Status::MaxFunReached => Some(3),
            Status::DenominatorCancellation => Some(4),
            Status::NptOutOfRange => Some(5),
            Status::BoundGapTooSmall => Some(6),
            Status::DamagingRounding => Some(7),
            Status::RoundingPreventsStep => Some(8),
            Status::ZeroDenominator => Some(9),
            Status::DimensionTooSmall => Some(10),
            Status::MaxFunTooSmall => Some(11),
            Status::ZeroConstraintGradient => Some(12),
            Status::NanInX => Some(-1),
            Status::NanInfF => Some(-2),
        }
    }
}

/// The user-supplied objective/constraint evaluation.
///
/// A single synchronous operation: given `x`, fill `constr` with the `m`
/// constraint values (feasibility means `constr[i] >= 0`) and return the
/// objective value. The solver guards NaN and infinite outputs; the callback
/// may return them freely.
pub trait ObjCon {
    fn eval(&mut self, x: &[E], constr: &mut [E]) -> E;
}

impl<F> ObjCon for F
where
    F: FnMut(&[E], &mut [E]) -> E,
{
    fn eval(&mut self, x: &[E], constr: &mut [E]) -> E {
        self(x, constr)
    }
}
