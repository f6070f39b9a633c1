//! COBYLA: constrained optimization by linear approximation.
//!
//! Minimizes `f(x)` subject to `c(x) >= 0` using linear interpolation models
//! of the objective and every constraint on a simplex of `n + 1` points,
//! without derivatives. [`Cobyla`] owns the configuration; [`cobyla`] is a
//! one-call convenience over it.

pub(crate) mod driver;
pub(crate) mod simplex;
pub(crate) mod trustregion;

use derive_more::{Display, Error};
use faer::Col;
use problemo::Problem;

use crate::callback::Verbosity;
use crate::eval::History;
use crate::{E, I, ObjCon, Status};

pub use driver::{SnapshotPoint, SolverSnapshot};

/// Rejected arguments. These surface immediately from the entry point;
/// every runtime outcome is reported through [`Status`] instead.
#[derive(Debug, Display, Error, PartialEq)]
pub enum ValidationError {
    #[display("the problem must have at least one variable")]
    NoVariables,

    #[display("rhobeg must be finite and positive")]
    InvalidRhobeg,

    #[display("rhoend must be finite and positive")]
    InvalidRhoend,

    #[display("ctol must be finite and nonnegative")]
    InvalidCtol,

    #[display("constr0 must have one entry per constraint")]
    SeedConstraintMismatch,

    #[display("f0 and constr0 must be supplied together when m > 0")]
    IncompleteSeed,
}

/// Options recognized by the COBYLA entry point.
///
/// Unset values are filled with the conventional defaults at entry:
/// `maxfun = 500 n` (raised to at least `n + 2`), `maxhist = maxfun`,
/// `rhoend` clamped to at most `rhobeg`.
#[derive(Debug, Clone)]
pub struct CobylaOptions {
    /// Initial trust-region radius.
    pub rhobeg: E,
    /// Final trust-region radius; the resolution at which the solver stops.
    pub rhoend: E,
    /// Early-exit threshold: stop as soon as a point with `f <= ftarget`
    /// and `cv <= ctol` is seen.
    pub ftarget: E,
    /// Feasibility tolerance on the constraint violation.
    pub ctol: E,
    /// Evaluation budget.
    pub maxfun: Option<I>,
    /// History capacity.
    pub maxhist: Option<I>,
    /// Reporting level.
    pub iprint: Verbosity,
    /// Objective value at the starting point, skipping one evaluation.
    pub f0: Option<E>,
    /// Constraint values at the starting point, skipping one evaluation.
    pub constr0: Option<Vec<E>>,
}

impl Default for CobylaOptions {
    fn default() -> Self {
        Self {
            rhobeg: 1.0,
            rhoend: 1e-6,
            ftarget: E::NEG_INFINITY,
            ctol: E::EPSILON.sqrt(),
            maxfun: None,
            maxhist: None,
            iprint: Verbosity::Silent,
            f0: None,
            constr0: None,
        }
    }
}

/// Options after validation and default filling.
pub(crate) struct ResolvedOptions {
    pub n: I,
    pub m: I,
    pub rhobeg: E,
    pub rhoend: E,
    pub ftarget: E,
    pub ctol: E,
    pub maxfun: I,
    pub maxhist: I,
    pub iprint: Verbosity,
    pub f0: Option<E>,
    pub constr0: Option<Col<E>>,
}

pub(crate) fn resolve(n: I, m: I, options: &CobylaOptions) -> Result<ResolvedOptions, Problem> {
    if n == 0 {
        Err(ValidationError::NoVariables)?;
    }
    if !options.rhobeg.is_finite() || options.rhobeg <= 0.0 {
        Err(ValidationError::InvalidRhobeg)?;
    }
    if !options.rhoend.is_finite() || options.rhoend <= 0.0 {
        Err(ValidationError::InvalidRhoend)?;
    }
    if !options.ctol.is_finite() || options.ctol < 0.0 {
        Err(ValidationError::InvalidCtol)?;
    }
    if let Some(constr0) = &options.constr0 {
        if constr0.len() != m {
            Err(ValidationError::SeedConstraintMismatch)?;
        }
    }
    if m > 0 && options.f0.is_some() != options.constr0.is_some() {
        Err(ValidationError::IncompleteSeed)?;
    }

    let maxfun = options.maxfun.unwrap_or(500 * n).max(n + 2);
    Ok(ResolvedOptions {
        n,
        m,
        rhobeg: options.rhobeg,
        rhoend: options.rhoend.min(options.rhobeg),
        ftarget: options.ftarget,
        ctol: options.ctol,
        maxfun,
        maxhist: options.maxhist.unwrap_or(maxfun).min(maxfun),
        iprint: options.iprint,
        f0: options.f0,
        constr0: options
            .constr0
            .as_ref()
            .map(|c| Col::from_fn(c.len(), |i| c[i])),
    })
}

/// Result of a COBYLA run. `x` is the best point seen, `f`/`cv`/`constr`
/// its values, `nf` the number of callback evaluations, `status` the exit
/// condition, and `history` the recorded evaluations trimmed to length.
pub struct CobylaResult {
    pub x: Vec<E>,
    pub f: E,
    pub cv: E,
    pub constr: Vec<E>,
    pub nf: I,
    pub status: Status,
    pub history: History,
}

/// The COBYLA solver with its configuration.
#[derive(Debug, Clone, Default)]
pub struct Cobyla {
    options: CobylaOptions,
}

impl Cobyla {
    /// A solver with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// A solver with the given options.
    pub fn with_options(options: CobylaOptions) -> Self {
        Self { options }
    }

    /// Sets the initial and final trust-region radii.
    pub fn with_trust_region(mut self, rhobeg: E, rhoend: E) -> Self {
        self.options.rhobeg = rhobeg;
        self.options.rhoend = rhoend;
        self
    }

    /// Sets the early-exit objective target.
    pub fn with_ftarget(mut self, ftarget: E) -> Self {
        self.options.ftarget = ftarget;
        self
    }

    /// Sets the feasibility tolerance.
    pub fn with_ctol(mut self, ctol: E) -> Self {
        self.options.ctol = ctol;
        self
    }

    /// Sets the evaluation budget.
    pub fn with_maxfun(mut self, maxfun: I) -> Self {
        self.options.maxfun = Some(maxfun);
        self
    }

    /// Sets the history capacity.
    pub fn with_history_capacity(mut self, maxhist: I) -> Self {
        self.options.maxhist = Some(maxhist);
        self
    }

    /// Sets the reporting level.
    pub fn with_iprint(mut self, iprint: Verbosity) -> Self {
        self.options.iprint = iprint;
        self
    }

    /// Supplies precomputed values at the starting point, skipping one
    /// evaluation.
    pub fn with_seed(mut self, f0: E, constr0: &[E]) -> Self {
        self.options.f0 = Some(f0);
        self.options.constr0 = Some(constr0.to_vec());
        self
    }

    /// Minimizes `calcfc` starting from `x0` under `m` inequality
    /// constraints.
    pub fn minimize<F: ObjCon>(
        &self,
        calcfc: &mut F,
        x0: &[E],
        m: I,
    ) -> Result<CobylaResult, Problem> {
        let resolved = resolve(x0.len(), m, &self.options)?;
        let x0 = Col::from_fn(x0.len(), |i| x0[i]);
        Ok(driver::Cobylb::new(calcfc, x0, resolved).run())
    }
}

/// One-call entry point over [`Cobyla`].
pub fn cobyla<F: ObjCon>(
    calcfc: &mut F,
    x0: &[E],
    m: I,
    options: &CobylaOptions,
) -> Result<CobylaResult, Problem> {
    Cobyla::with_options(options.clone()).minimize(calcfc, x0, m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_fills_defaults() {
        let resolved = resolve(2, 0, &CobylaOptions::default()).unwrap();
        assert_eq!(resolved.maxfun, 1000);
        assert_eq!(resolved.maxhist, 1000);
        assert_eq!(resolved.rhoend, 1e-6);
    }

    #[test]
    fn test_resolve_clamps_rhoend_and_raises_maxfun() {
        let options = CobylaOptions {
            rhobeg: 0.5,
            rhoend: 2.0,
            maxfun: Some(0),
            ..Default::default()
        };
        let resolved = resolve(3, 0, &options).unwrap();
        assert_eq!(resolved.rhoend, 0.5);
        assert_eq!(resolved.maxfun, 5);
        assert_eq!(resolved.maxhist, 5);
    }

    #[test]
    fn test_resolve_rejects_bad_arguments() {
        assert!(resolve(0, 0, &CobylaOptions::default()).is_err());

        let options = CobylaOptions {
            rhobeg: E::NAN,
            ..Default::default()
        };
        assert!(resolve(2, 0, &options).is_err());

        let options = CobylaOptions {
            rhobeg: -1.0,
            ..Default::default()
        };
        assert!(resolve(2, 0, &options).is_err());

        let options = CobylaOptions {
            constr0: Some(vec![0.0; 2]),
            f0: Some(1.0),
            ..Default::default()
        };
        assert!(resolve(2, 3, &options).is_err());

        let options = CobylaOptions {
            f0: Some(1.0),
            ..Default::default()
        };
        assert!(resolve(2, 1, &options).is_err());
    }
}
