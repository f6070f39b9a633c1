//! The COBYLA driver: builds the initial simplex, alternates geometry and
//! trust-region iterations, manages the penalty and the trust radii, and
//! owns every termination source.

use faer::{Col, ColRef};
use serde::{Deserialize, Serialize};

use crate::activeset::WorkingSet;
use crate::callback::{Callback, Callbacks};
use crate::cobyla::simplex::Simplex;
use crate::cobyla::trustregion::trstlp;
use crate::cobyla::{CobylaResult, ResolvedOptions};
use crate::eval::{Evaluator, History};
use crate::{E, I, ObjCon, Status};

/// Ratio thresholds for shrinking and expanding the inner radius.
const ETA_BAD: E = 0.1;
const ETA_GOOD: E = 0.7;
/// Outer-radius shrink factor.
const GAMMA_RHO: E = 0.5;

/// A point with its observed values.
#[derive(Clone)]
struct Point {
    x: Col<E>,
    f: E,
    constr: Col<E>,
    cv: E,
}

/// Serializable image of the driver state between iterations. Restoring a
/// snapshot and continuing is deterministic: the factored quantities are
/// rebuilt, not stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSnapshot {
    pub n: I,
    pub m: I,
    /// Vertices, column-major `n x (n + 1)`.
    pub verts: Vec<E>,
    pub fval: Vec<E>,
    /// Constraint values, column-major `m x (n + 1)`.
    pub conval: Vec<E>,
    pub cval: Vec<E>,
    pub kopt: I,
    pub rho: E,
    pub delta: E,
    pub cpen: E,
    pub nf: I,
    pub best: Option<SnapshotPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPoint {
    pub x: Vec<E>,
    pub f: E,
    pub constr: Vec<E>,
    pub cv: E,
}

/// Lexicographic merit order used to rank evaluated points: feasibility
/// first, then the objective.
fn is_better(ctol: E, f1: E, cv1: E, f2: E, cv2: E) -> bool {
    let feas1 = cv1 <= ctol;
    let feas2 = cv2 <= ctol;
    if feas1 != feas2 {
        return feas1;
    }
    if feas1 {
        f1 < f2 || (f1 == f2 && cv1 < cv2)
    } else {
        cv1 < cv2 || (cv1 == cv2 && f1 < f2)
    }
}

pub(crate) struct Cobylb<'a> {
    evaluator: Evaluator<'a>,
    simplex: Simplex,
    ws: WorkingSet,
    history: History,
    callbacks: Callbacks,
    opts: ResolvedOptions,
    x0: Col<E>,
    rho: E,
    delta: E,
    cpen: E,
    status: Status,
    /// Best point seen, under the merit order of [`is_better`].
    best: Option<Point>,
    /// Most recent evaluation, kept for the degenerate exits where no
    /// finite point was ever seen.
    last: Option<Point>,
}

impl<'a> Cobylb<'a> {
    pub fn new(objcon: &'a mut dyn ObjCon, x0: Col<E>, opts: ResolvedOptions) -> Self {
        let n = opts.n;
        let m = opts.m;
        Self {
            evaluator: Evaluator::new(objcon, n, m),
            simplex: Simplex::new(n, m),
            ws: WorkingSet::new(n, m),
            history: History::with_capacity(n, m, opts.maxhist),
            callbacks: Callbacks::from(opts.iprint),
            rho: opts.rhobeg,
            delta: opts.rhobeg,
            cpen: 0.0,
            status: Status::InProgress,
            best: None,
            last: None,
            x0,
            opts,
        }
    }

    /// Runs the full state machine and returns the result.
    pub fn run(mut self) -> CobylaResult {
        match self.initialize() {
            Ok(()) => self.main_loop(),
            Err(status) => self.status = status,
        }
        self.finalize()
    }

    /// Restores a snapshot and continues from it.
    pub fn resume(mut self, snapshot: &SolverSnapshot) -> CobylaResult {
        match self.restore(snapshot) {
            Ok(()) => self.main_loop(),
            Err(status) => self.status = status,
        }
        self.finalize()
    }

    /// Evaluates the initial simplex: the starting point (or its seed
    /// values) plus one coordinate step of `rhobeg` per dimension, then
    /// centers the models on the best vertex.
    pub fn initialize(&mut self) -> Result<(), Status> {
        let n = self.opts.n;
        for k in 0..=n {
            let mut x = self.x0.clone();
            if k > 0 {
                x[k - 1] += self.opts.rhobeg;
            }

            let seeded = k == 0 && self.opts.f0.is_some();
            let (f, constr, cv) = if seeded {
                let f = self.opts.f0.unwrap();
                let constr = self
                    .opts
                    .constr0
                    .clone()
                    .unwrap_or_else(|| Col::zeros(self.opts.m));
                let mut cv = 0.0;
                for j in 0..self.opts.m {
                    cv = E::max(cv, -constr[j]);
                }
                self.note_point(x.as_ref(), f, constr.as_ref(), cv);
                (f, constr, cv)
            } else {
                self.evaluate(x.as_ref())?
            };

            self.simplex.set_vertex(k, x.as_ref(), f, constr.as_ref(), cv);
        }

        let mut kopt = 0;
        for k in 1..=n {
            if is_better(
                self.opts.ctol,
                self.simplex.f(k),
                self.simplex.cv(k),
                self.simplex.f(kopt),
                self.simplex.cv(kopt),
            ) {
                kopt = k;
            }
        }
        self.simplex.set_kopt(kopt)
    }

    fn restore(&mut self, snapshot: &SolverSnapshot) -> Result<(), Status> {
        let n = self.opts.n;
        let m = self.opts.m;
        debug_assert!(snapshot.n == n && snapshot.m == m);

        for k in 0..=n {
            let x = Col::from_fn(n, |i| snapshot.verts[k * n + i]);
            let constr = Col::from_fn(m, |j| snapshot.conval[k * m + j]);
            self.simplex
                .set_vertex(k, x.as_ref(), snapshot.fval[k], constr.as_ref(), snapshot.cval[k]);
        }
        self.rho = snapshot.rho;
        self.delta = snapshot.delta;
        self.cpen = snapshot.cpen;
        self.evaluator.set_nf(snapshot.nf);
        self.best = snapshot.best.as_ref().map(|p| Point {
            x: Col::from_fn(n, |i| p.x[i]),
            f: p.f,
            constr: Col::from_fn(m, |j| p.constr[j]),
            cv: p.cv,
        });
        self.simplex.set_kopt(snapshot.kopt)
    }

    /// Captures the restartable part of the driver state.
    pub fn snapshot(&self) -> SolverSnapshot {
        let n = self.opts.n;
        let m = self.opts.m;
        let mut verts = Vec::with_capacity(n * (n + 1));
        let mut conval = Vec::with_capacity(m * (n + 1));
        let mut fval = Vec::with_capacity(n + 1);
        let mut cval = Vec::with_capacity(n + 1);
        for k in 0..=n {
            for i in 0..n {
                verts.push(self.simplex.vertex(k)[i]);
            }
            for j in 0..m {
                conval.push(self.simplex.constr(k)[j]);
            }
            fval.push(self.simplex.f(k));
            cval.push(self.simplex.cv(k));
        }
        SolverSnapshot {
            n,
            m,
            verts,
            fval,
            conval,
            cval,
            kopt: self.simplex.kopt(),
            rho: self.rho,
            delta: self.delta,
            cpen: self.cpen,
            nf: self.evaluator.nf(),
            best: self.best.as_ref().map(|p| SnapshotPoint {
                x: (0..n).map(|i| p.x[i]).collect(),
                f: p.f,
                constr: (0..m).map(|j| p.constr[j]).collect(),
                cv: p.cv,
            }),
        }
    }

    /// Current outer and inner trust radii.
    #[cfg(test)]
    pub(crate) fn radii(&self) -> (E, E) {
        (self.rho, self.delta)
    }

    /// Current merit penalty.
    #[cfg(test)]
    pub(crate) fn penalty(&self) -> E {
        self.cpen
    }

    pub fn main_loop(&mut self) {
        let status = loop {
            match self.iterate() {
                Ok(()) => continue,
                Err(status) => break status,
            }
        };
        self.status = status;
    }

    pub(crate) fn iterate(&mut self) -> Result<(), Status> {
        if !self.simplex.good_geometry(self.delta) {
            self.geometry_iteration()
        } else {
            self.trust_iteration()
        }
    }

    /// Re-interpolates one vertex to restore affine independence at the
    /// current radius.
    fn geometry_iteration(&mut self) -> Result<(), Status> {
        let jdrop = self.simplex.geometry_drop(self.delta);
        let d = self.simplex.geometry_step(jdrop, self.delta, self.cpen);
        let x = Col::from_fn(self.opts.n, |i| self.simplex.incumbent()[i] + d[i]);

        let (f, constr, cv) = self.evaluate(x.as_ref())?;
        let adopt = self.improves_merit(f, cv);
        self.simplex
            .replace_vertex(jdrop, x.as_ref(), f, constr.as_ref(), cv)?;
        if adopt {
            self.simplex.set_kopt(jdrop)?;
        }
        Ok(())
    }

    fn trust_iteration(&mut self) -> Result<(), Status> {
        let kopt = self.simplex.kopt();
        let step = trstlp(
            self.simplex.fgrad(),
            self.simplex.congrad(),
            self.simplex.constr(kopt),
            self.delta,
            &mut self.ws,
        );
        let dnorm = step.d.norm_l2();

        // A step much shorter than the resolution cannot make progress; the
        // models are already trusted at this scale.
        if dnorm < 0.5 * self.rho {
            self.delta = (0.5 * self.delta).max(self.rho);
            if self.delta <= self.rho {
                return self.shrink_rho();
            }
            return Ok(());
        }

        // Raise the penalty until the predicted merit reduction covers half
        // of the predicted violation reduction; never lower it.
        if step.prerec > 0.0 {
            let barmu = (-step.preref).max(0.0) / step.prerec;
            if self.cpen < 1.5 * barmu {
                self.cpen = 2.0 * barmu;
            }
        }

        let pred = step.preref + self.cpen * step.prerec;
        if !(pred > 0.0) {
            if step.zero_grad && self.simplex.cv(kopt) > self.opts.ctol {
                return Err(Status::ZeroConstraintGradient);
            }
            if self.delta > self.rho {
                self.delta = (0.5 * self.delta).max(self.rho);
                return Ok(());
            }
            if self.rho > self.opts.rhoend {
                return self.shrink_rho();
            }
            return Err(Status::TrustRegionFailure);
        }

        let x = Col::from_fn(self.opts.n, |i| self.simplex.incumbent()[i] + step.d[i]);
        let (f, constr, cv) = self.evaluate(x.as_ref())?;

        let phi_old = self.simplex.f(kopt) + self.cpen * self.simplex.cv(kopt);
        let phi_new = f + self.cpen * cv;
        let ratio = (phi_old - phi_new) / pred;

        if ratio < ETA_BAD {
            self.delta = (0.5 * dnorm).max(self.rho);
        } else if ratio > ETA_GOOD && dnorm > 0.9 * self.delta {
            self.delta = (2.0 * self.delta).min(self.opts.rhobeg);
        }
        if self.delta <= 1.5 * self.rho {
            self.delta = self.rho;
        }

        let improved = phi_new < phi_old || (phi_new == phi_old && cv < self.simplex.cv(kopt));
        if let Some(jdrop) = self
            .simplex
            .drop_for_tr(step.d.as_ref(), improved, self.delta, self.rho)
        {
            self.simplex
                .replace_vertex(jdrop, x.as_ref(), f, constr.as_ref(), cv)?;
            if improved {
                self.simplex.set_kopt(jdrop)?;
            }
        }

        if ratio < ETA_BAD && self.delta <= self.rho && self.simplex.good_geometry(self.delta) {
            return self.shrink_rho();
        }
        Ok(())
    }

    /// Shrinks the outer radius, or terminates when it is already at its
    /// final value.
    fn shrink_rho(&mut self) -> Result<(), Status> {
        if self.rho <= self.opts.rhoend {
            return Err(Status::SmallTrustRadius);
        }
        let old = self.rho;
        self.rho = if GAMMA_RHO * self.rho <= 1.5 * self.opts.rhoend {
            self.opts.rhoend
        } else {
            GAMMA_RHO * self.rho
        };
        self.delta = (0.5 * old).max(self.rho);

        let kopt = self.simplex.kopt();
        self.callbacks.on_rho_change(
            self.rho,
            self.evaluator.nf(),
            self.simplex.f(kopt),
            self.simplex.cv(kopt),
        );
        Ok(())
    }

    /// Whether a candidate beats the incumbent under the penalized merit.
    fn improves_merit(&self, f: E, cv: E) -> bool {
        let kopt = self.simplex.kopt();
        let phi_old = self.simplex.f(kopt) + self.cpen * self.simplex.cv(kopt);
        let phi_new = f + self.cpen * cv;
        phi_new < phi_old || (phi_new == phi_old && cv < self.simplex.cv(kopt))
    }

    /// Evaluates the callback at `x` with every guard applied: the budget,
    /// NaN iterates, non-finite outputs, and the objective target.
    fn evaluate(&mut self, x: ColRef<'_, E>) -> Result<(E, Col<E>, E), Status> {
        if self.evaluator.nf() >= self.opts.maxfun {
            return Err(Status::MaxFunReached);
        }

        let ev = self.evaluator.eval(x)?;
        self.history.push(x, ev.f_raw, ev.constr.as_ref(), ev.cv);
        self.callbacks.on_eval(self.evaluator.nf(), ev.f_raw, ev.cv);
        self.last = Some(Point {
            x: x.to_owned(),
            f: ev.f_raw,
            constr: ev.constr.clone(),
            cv: ev.cv,
        });

        if ev.nonfinite {
            return Err(Status::NanInfF);
        }

        self.note_point(x, ev.f, ev.constr.as_ref(), ev.cv);
        if ev.f <= self.opts.ftarget && ev.cv <= self.opts.ctol {
            return Err(Status::TargetAchieved);
        }
        Ok((ev.f, ev.constr, ev.cv))
    }

    /// Records a finite point in the best-seen ranking.
    fn note_point(&mut self, x: ColRef<'_, E>, f: E, constr: ColRef<'_, E>, cv: E) {
        let replace = match &self.best {
            None => true,
            Some(best) => is_better(self.opts.ctol, f, cv, best.f, best.cv),
        };
        if replace {
            self.best = Some(Point {
                x: x.to_owned(),
                f,
                constr: constr.to_owned(),
                cv,
            });
        }
    }

    /// Emits the exit report, trims the history, and packages the best
    /// point seen (falling back to the last evaluation, then the starting
    /// point, when nothing finite was recorded).
    pub fn finalize(mut self) -> CobylaResult {
        let n = self.opts.n;
        let m = self.opts.m;
        let point = self.best.clone().or_else(|| self.last.clone()).unwrap_or(Point {
            x: self.x0.clone(),
            f: E::NAN,
            constr: Col::from_fn(m, |_| E::NAN),
            cv: E::NAN,
        });

        self.callbacks
            .on_exit(self.status, self.evaluator.nf(), point.f, point.cv);
        self.history.trim();

        CobylaResult {
            x: (0..n).map(|i| point.x[i]).collect(),
            f: point.f,
            cv: point.cv,
            constr: (0..m).map(|j| point.constr[j]).collect(),
            nf: self.evaluator.nf(),
            status: self.status,
            history: self.history,
        }
    }
}
