//! Working-set maintenance and the projected-steepest-descent engine.
//!
//! Given the gradient of a model, a trust-region slice, and the matrix of
//! constraint gradients, [`getact`] produces a descent direction projected
//! onto the orthogonal complement of the active constraint gradients, adding
//! and deleting constraints from the working set through Goldfarb-Idnani
//! rank-one updates of an incremental QR factorization. The factored state
//! lives in a [`WorkingSet`] owned by the outer loop and warm-started across
//! inner sub-steps.

use faer::{Col, ColRef, Mat, MatRef};

use crate::linalg::qr::{qr_add, qr_exchange};
use crate::linalg::vector_ops::{dot, is_orthogonal, is_upper_triangular, norm_inf};
use crate::{E, I};

/// Floor applied to restored slacks so a deleted constraint stays eligible.
pub(crate) const TINY_CV: E = 1e-60;

/// Persisted state of the active set.
///
/// `qfac * rfac[:, 0..nact]` equals the active columns of the constraint
/// matrix in `iact` order, with `rfac` upper-triangular and a strictly
/// positive diagonal over the active block. `resnew[j]` is the slack of an
/// inactive constraint (floored at [`TINY_CV`]) and exactly zero for an
/// active one; `resact` carries the slacks of the active constraints;
/// `vlam` their multipliers.
pub struct WorkingSet {
    pub(crate) qfac: Mat<E>,
    pub(crate) rfac: Mat<E>,
    pub(crate) iact: Vec<I>,
    pub(crate) nact: I,
    pub(crate) resact: Col<E>,
    pub(crate) resnew: Col<E>,
    pub(crate) vlam: Col<E>,
}

impl WorkingSet {
    /// An empty working set for `n` variables and `m` constraints. The
    /// matrices are allocated once here and reused by every `getact` call.
    pub fn new(n: I, m: I) -> Self {
        let cap = m.min(n);
        Self {
            qfac: Mat::identity(n, n),
            rfac: Mat::zeros(n, n),
            iact: vec![0; cap],
            nact: 0,
            resact: Col::zeros(cap),
            resnew: Col::zeros(m),
            vlam: Col::zeros(cap),
        }
    }

    pub fn nact(&self) -> I {
        self.nact
    }

    pub fn iact(&self) -> &[I] {
        &self.iact[..self.nact]
    }

    /// Empties the working set without releasing storage.
    pub fn reset(&mut self) {
        let n = self.qfac.nrows();
        self.nact = 0;
        self.qfac = Mat::identity(n, n);
        self.rfac = Mat::zeros(n, n);
    }

    /// Refreshes the slacks from the caller's current iterate: inactive
    /// constraints get `slack` (floored at [`TINY_CV`]), active constraints
    /// keep `resnew = 0` and have their `resact` snapshot updated.
    pub fn update_slacks(&mut self, slack: ColRef<'_, E>) {
        let m = self.resnew.nrows();
        for j in 0..m {
            self.resnew[j] = slack[j].max(TINY_CV);
        }
        for i in 0..self.nact {
            let j = self.iact[i];
            self.resnew[j] = 0.0;
            self.resact[i] = slack[j].max(0.0);
        }
    }

    /// Removes the `ic`-th active constraint, restoring its slack.
    fn delete(&mut self, ic: I) {
        let freed = self.iact[ic];
        self.resnew[freed] = self.resact[ic].max(TINY_CV);
        qr_exchange(&mut self.qfac, &mut self.rfac, ic, self.nact);
        for i in ic..self.nact - 1 {
            self.iact[i] = self.iact[i + 1];
            self.resact[i] = self.resact[i + 1];
            self.vlam[i] = self.vlam[i + 1];
        }
        self.nact -= 1;
    }

    /// Multipliers from the triangular system `R vlam = Q^T g` over the
    /// active block.
    fn solve_multipliers(&mut self, g: ColRef<'_, E>) {
        for i in (0..self.nact).rev() {
            let mut t = dot(self.qfac.col(i), g);
            for j in (i + 1)..self.nact {
                t -= self.rfac[(i, j)] * self.vlam[j];
            }
            self.vlam[i] = t / self.rfac[(i, i)];
        }
    }

    #[cfg(debug_assertions)]
    fn check_invariants(&self, m: I) {
        let n = self.qfac.nrows();
        let tol = E::max(1e-10, E::min(0.1, 1e8 * E::EPSILON * (m + 1) as E));
        debug_assert!(self.nact <= m.min(n));
        debug_assert!(is_orthogonal(self.qfac.as_ref(), tol));
        debug_assert!(is_upper_triangular(self.rfac.as_ref(), tol));
        for i in 0..self.nact {
            debug_assert!(self.rfac[(i, i)] > 0.0);
            for j in 0..i {
                debug_assert!(self.iact[i] != self.iact[j]);
            }
        }
    }
}

/// Projected steepest descent under the current working set.
///
/// `amat` is the `n x m` matrix of constraint gradients with unit columns,
/// oriented so that `amat.col(j)^T d > 0` consumes the slack of constraint
/// `j`. `snorm` is the trust-region slice available to the step. The
/// working set is pruned, extended and repaired in place; the returned
/// direction is zero when no descent is possible.
pub fn getact(amat: MatRef<'_, E>, g: ColRef<'_, E>, snorm: E, ws: &mut WorkingSet) -> Col<E> {
    let n = g.nrows();
    let m = amat.ncols();
    let tdel = 0.2 * snorm;
    let mut ddsav = 2.0 * dot(g, g);

    // Prune constraints whose slack has grown beyond the near-active band.
    for ic in (0..ws.nact).rev() {
        if ws.resact[ic] > tdel {
            ws.delete(ic);
        }
    }

    // Prune constraints whose multiplier has the wrong sign, largest index
    // first, re-solving after every deletion.
    while ws.nact > 0 {
        ws.solve_multipliers(g);
        let mut drop = None;
        for i in 0..ws.nact {
            if ws.vlam[i] >= 0.0 {
                drop = Some(i);
            }
        }
        match drop {
            Some(ic) => ws.delete(ic),
            None => break,
        }
    }

    let mut d = Col::<E>::zeros(n);
    for _ in 0..(2 * (m + n)) {
        if ws.nact == n {
            #[cfg(debug_assertions)]
            ws.check_invariants(m);
            return Col::zeros(n);
        }

        // Steepest descent projected onto the complement of the active span.
        for i in 0..n {
            d[i] = 0.0;
        }
        for j in ws.nact..n {
            let proj = dot(ws.qfac.col(j), g);
            for i in 0..n {
                d[i] -= proj * ws.qfac[(i, j)];
            }
        }

        let dd = dot(d.as_ref(), d.as_ref());
        if dd >= ddsav {
            // Rounding has stopped the projected gradient from shrinking.
            #[cfg(debug_assertions)]
            ws.check_invariants(m);
            return Col::zeros(n);
        }
        if dd == 0.0 {
            break;
        }
        ddsav = dd;
        let dnorm = dd.sqrt();

        // Find the most violated of the near-active constraints the step is
        // about to cross.
        let apsd: Col<E> = amat.transpose() * &d;
        let mut violmx = 0.0;
        let mut l = None;
        for j in 0..m {
            if ws.resnew[j] > 0.0
                && ws.resnew[j] <= tdel
                && apsd[j] > (dnorm / snorm) * ws.resnew[j]
                && apsd[j] > violmx
            {
                violmx = apsd[j];
                l = Some(j);
            }
        }
        let Some(l) = l else { break };

        // Ignore violations at the level of floating-point noise relative to
        // the already-active constraints.
        let act_inf = {
            let act = Col::from_fn(ws.nact, |i| apsd[ws.iact[i]]);
            norm_inf(act.as_ref())
        };
        if violmx <= 0.01 * dnorm && violmx <= 10.0 * act_inf {
            break;
        }

        // Add constraint `l` to the working set.
        qr_add(amat.col(l), &mut ws.qfac, &mut ws.rfac, ws.nact);
        ws.iact[ws.nact] = l;
        ws.resact[ws.nact] = ws.resnew[l];
        ws.resnew[l] = 0.0;
        ws.vlam[ws.nact] = 0.0;
        ws.nact += 1;

        // Repair the multipliers, deleting constraints that lose their sign.
        let mut violmx = violmx;
        while violmx > 0.0 && ws.nact > 0 {
            let nact = ws.nact;
            let mut mu = vec![0.0; nact];
            mu[nact - 1] = 1.0 / ws.rfac[(nact - 1, nact - 1)].powi(2);
            for i in (0..nact - 1).rev() {
                let mut t = 0.0;
                for j in (i + 1)..nact {
                    t += ws.rfac[(i, j)] * mu[j];
                }
                mu[i] = -t / ws.rfac[(i, i)];
            }

            let mut vmult = violmx;
            let mut ic: Option<I> = None;
            for (i, &mu_i) in mu.iter().enumerate() {
                if mu_i < 0.0 {
                    let frac = ws.vlam[i] / mu_i;
                    if frac <= vmult {
                        vmult = frac;
                        ic = Some(i);
                    }
                }
            }

            violmx = (violmx - vmult).max(0.0);
            for i in 0..nact {
                ws.vlam[i] -= vmult * mu[i];
            }
            if let Some(ic) = ic {
                ws.vlam[ic] = 0.0;
            }
            for i in (0..ws.nact).rev() {
                if ws.vlam[i] >= 0.0 {
                    ws.delete(i);
                }
            }
        }
    }

    #[cfg(debug_assertions)]
    ws.check_invariants(m);
    d
}
