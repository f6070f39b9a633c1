//! Synchronous evaluation of the user callback, with NaN/infinity
//! moderation, and the fixed-capacity evaluation history.

use faer::{Col, ColRef, Mat, MatRef};

use crate::{E, HUGENUM, I, ObjCon, Status};

/// One moderated evaluation of the callback.
#[derive(Debug)]
pub(crate) struct Evaluation {
    /// Objective value as returned by the callback.
    pub f_raw: E,
    /// Objective value with non-finite entries clamped.
    pub f: E,
    /// Constraint values with infinities clamped.
    pub constr: Col<E>,
    /// Violation `max(0, -min_i constr[i])`.
    pub cv: E,
    /// Whether the callback produced NaN anywhere or a near-infinite
    /// objective; such a point terminates the solver.
    pub nonfinite: bool,
}

/// Invokes the user callback, counts evaluations, and moderates the
/// returned values. The `x` and `constr` slice buffers are allocated once.
pub(crate) struct Evaluator<'a> {
    objcon: &'a mut dyn ObjCon,
    nf: I,
    xbuf: Vec<E>,
    cbuf: Vec<E>,
}

impl<'a> Evaluator<'a> {
    pub fn new(objcon: &'a mut dyn ObjCon, n: I, m: I) -> Self {
        Self {
            objcon,
            nf: 0,
            xbuf: vec![0.0; n],
            cbuf: vec![0.0; m],
        }
    }

    pub fn nf(&self) -> I {
        self.nf
    }

    /// Restores the evaluation count when resuming from a snapshot.
    pub fn set_nf(&mut self, nf: I) {
        self.nf = nf;
    }

    /// Evaluates the callback at `x`. NaN entries in `x` abort before the
    /// callback runs and do not count as an evaluation.
    pub fn eval(&mut self, x: ColRef<'_, E>) -> Result<Evaluation, Status> {
        if crate::linalg::vector_ops::contains_nan(x) {
            return Err(Status::NanInX);
        }

        for i in 0..self.xbuf.len() {
            self.xbuf[i] = x[i];
        }
        let f_raw = self.objcon.eval(&self.xbuf, &mut self.cbuf);
        self.nf += 1;

        let mut nonfinite = !f_raw.is_finite() || f_raw.abs() >= HUGENUM;
        let f = if f_raw.is_nan() {
            HUGENUM
        } else {
            f_raw.clamp(-HUGENUM, HUGENUM)
        };

        let m = self.cbuf.len();
        let mut constr = Col::<E>::zeros(m);
        let mut cv = 0.0;
        for i in 0..m {
            let c = self.cbuf[i];
            if c.is_nan() {
                nonfinite = true;
                constr[i] = -HUGENUM;
            } else {
                constr[i] = c.clamp(-HUGENUM, HUGENUM);
            }
            cv = E::max(cv, -constr[i]);
        }

        Ok(Evaluation {
            f_raw,
            f,
            constr,
            cv,
            nonfinite,
        })
    }
}

/// Append-only evaluation history with a fixed capacity.
///
/// Buffers are sized once at entry; once full, further evaluations are not
/// recorded. [`History::trim`] shrinks the storage to the recorded length
/// at solver exit.
pub struct History {
    xhist: Mat<E>,
    fhist: Col<E>,
    conhist: Mat<E>,
    chist: Col<E>,
    len: I,
}

impl History {
    pub(crate) fn with_capacity(n: I, m: I, cap: I) -> Self {
        Self {
            xhist: Mat::zeros(n, cap),
            fhist: Col::zeros(cap),
            conhist: Mat::zeros(m, cap),
            chist: Col::zeros(cap),
            len: 0,
        }
    }

    pub(crate) fn push(&mut self, x: ColRef<'_, E>, f: E, constr: ColRef<'_, E>, cv: E) {
        if self.len >= self.fhist.nrows() {
            return;
        }
        let k = self.len;
        for i in 0..self.xhist.nrows() {
            self.xhist[(i, k)] = x[i];
        }
        for i in 0..self.conhist.nrows() {
            self.conhist[(i, k)] = constr[i];
        }
        self.fhist[k] = f;
        self.chist[k] = cv;
        self.len += 1;
    }

    /// Shrinks the buffers to the recorded length.
    pub(crate) fn trim(&mut self) {
        let len = self.len;
        self.xhist = self.xhist.as_ref().subcols(0, len).to_owned();
        self.conhist = self.conhist.as_ref().subcols(0, len).to_owned();
        self.fhist = self.fhist.as_ref().subrows(0, len).to_owned();
        self.chist = self.chist.as_ref().subrows(0, len).to_owned();
    }

    /// Number of recorded evaluations.
    pub fn len(&self) -> I {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Recorded iterates, one column per evaluation.
    pub fn xhist(&self) -> MatRef<'_, E> {
        self.xhist.as_ref().subcols(0, self.len)
    }

    /// Recorded objective values.
    pub fn fhist(&self) -> ColRef<'_, E> {
        self.fhist.as_ref().subrows(0, self.len)
    }

    /// Recorded constraint values, one column per evaluation.
    pub fn conhist(&self) -> MatRef<'_, E> {
        self.conhist.as_ref().subcols(0, self.len)
    }

    /// Recorded constraint violations.
    pub fn chist(&self) -> ColRef<'_, E> {
        self.chist.as_ref().subrows(0, self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_moderates_nonfinite_values() {
        let mut calcfc = |x: &[E], constr: &mut [E]| {
            constr[0] = E::INFINITY;
            constr[1] = -1.0;
            x[0] * 2.0
        };
        let mut evaluator = Evaluator::new(&mut calcfc, 1, 2);

        let x = Col::from_fn(1, |_| 3.0);
        let ev = evaluator.eval(x.as_ref()).unwrap();
        assert_eq!(ev.f, 6.0);
        assert!(!ev.nonfinite);
        assert_eq!(ev.constr[0], HUGENUM);
        assert_eq!(ev.cv, 1.0);
        assert_eq!(evaluator.nf(), 1);
    }

    #[test]
    fn test_eval_flags_nan_objective() {
        let mut calcfc = |_x: &[E], _constr: &mut [E]| E::NAN;
        let mut evaluator = Evaluator::new(&mut calcfc, 2, 0);

        let x = Col::from_fn(2, |_| 0.0);
        let ev = evaluator.eval(x.as_ref()).unwrap();
        assert!(ev.nonfinite);
        assert!(ev.f_raw.is_nan());
        assert_eq!(evaluator.nf(), 1);
    }

    #[test]
    fn test_eval_rejects_nan_iterate_without_calling() {
        let mut called = false;
        let mut calcfc = |_x: &[E], _constr: &mut [E]| {
            called = true;
            0.0
        };
        let mut evaluator = Evaluator::new(&mut calcfc, 2, 0);

        let mut x = Col::from_fn(2, |_| 0.0);
        x[1] = E::NAN;
        assert_eq!(evaluator.eval(x.as_ref()).unwrap_err(), Status::NanInX);
        assert_eq!(evaluator.nf(), 0);
        drop(evaluator);
        assert!(!called);
    }

    #[test]
    fn test_history_capacity_and_trim() {
        let mut history = History::with_capacity(2, 1, 3);
        let x = Col::from_fn(2, |i| i as E);
        let c = Col::from_fn(1, |_| 1.0);
        for k in 0..5 {
            history.push(x.as_ref(), k as E, c.as_ref(), 0.0);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.fhist()[2], 2.0);

        history.trim();
        assert_eq!(history.xhist().ncols(), 3);
        assert_eq!(history.conhist().ncols(), 3);
    }
}
