//! Approximate solver for the linearized trust-region subproblem
//!
//! ```text
//!   min  fgrad^T d
//!   s.t. con + congrad^T d >= 0
//!        |d| <= delta
//! ```
//!
//! Two phases: a normal phase reduces the squared infeasibility of the
//! linearized constraints inside a slightly smaller ball, then a tangential
//! phase pushes the objective down through the projected-steepest-descent
//! engine, activating near-active constraints as they are approached.

use faer::{Col, ColRef, Mat, MatRef};

use crate::activeset::{WorkingSet, getact};
use crate::linalg::vector_ops::dot;
use crate::{E, I};

/// Fraction of the trust radius available to the normal (feasibility)
/// phase.
const NORMAL_FRACTION: E = 0.8;

/// Iteration caps for the two phases.
const TANGENTIAL_STEPS: I = 5;

pub(crate) struct TrustStep {
    pub d: Col<E>,
    /// Predicted reduction of the objective model, `-fgrad^T d`.
    pub preref: E,
    /// Predicted reduction of the maximum constraint violation.
    pub prerec: E,
    /// Whether a violated constraint with a vanishing model gradient was
    /// seen; such a constraint cannot be repaired by any step.
    pub zero_grad: bool,
}

/// Largest `t >= 0` with `|d + t p| <= radius`.
fn step_to_ball(d: ColRef<'_, E>, p: ColRef<'_, E>, radius: E) -> E {
    let pp = dot(p, p);
    if pp <= 0.0 {
        return 0.0;
    }
    let dp = dot(d, p);
    let slack = radius * radius - dot(d, d);
    if slack <= 0.0 {
        return 0.0;
    }
    (-dp + (dp * dp + pp * slack).sqrt()) / pp
}

/// Maximum violation `max(0, -min_i s_i)` of the linearized constraints at
/// `d`.
fn linearized_violation(con: ColRef<'_, E>, congrad: MatRef<'_, E>, d: ColRef<'_, E>) -> E {
    let mut viol = 0.0;
    for j in 0..con.nrows() {
        viol = E::max(viol, -(con[j] + dot(congrad.col(j), d)));
    }
    viol
}

/// Computes the trust-region step. `con` holds the constraint values at the
/// incumbent; the working set persists across the inner sub-steps and is
/// re-seeded here because the models change between outer iterations.
pub(crate) fn trstlp(
    fgrad: ColRef<'_, E>,
    congrad: MatRef<'_, E>,
    con: ColRef<'_, E>,
    delta: E,
    ws: &mut WorkingSet,
) -> TrustStep {
    let n = fgrad.nrows();
    let m = con.nrows();
    let mut d = Col::<E>::zeros(n);
    let mut zero_grad = false;

    let cv0 = linearized_violation(con, congrad, d.as_ref());

    // Normal phase: steepest descent on half the squared violation, with an
    // exact line search on the active quadratic piece.
    if cv0 > 0.0 {
        let radius = NORMAL_FRACTION * delta;
        for _ in 0..(m + n) {
            let mut slack = Col::<E>::zeros(m);
            let mut grad = Col::<E>::zeros(n);
            let mut any = false;
            for j in 0..m {
                slack[j] = con[j] + dot(congrad.col(j), d.as_ref());
                if slack[j] < 0.0 {
                    if congrad.col(j).norm_l2() <= E::EPSILON {
                        zero_grad = true;
                        continue;
                    }
                    any = true;
                    for i in 0..n {
                        grad[i] += slack[j] * congrad[(i, j)];
                    }
                }
            }
            if !any {
                break;
            }

            let gg = dot(grad.as_ref(), grad.as_ref());
            if gg <= E::EPSILON * E::EPSILON {
                break;
            }
            let p = Col::from_fn(n, |i| -grad[i]);
            let mut curv = 0.0;
            for j in 0..m {
                if slack[j] < 0.0 {
                    let rate = dot(congrad.col(j), p.as_ref());
                    curv += rate * rate;
                }
            }
            if curv <= 0.0 {
                break;
            }

            let t = E::min(gg / curv, step_to_ball(d.as_ref(), p.as_ref(), radius));
            if t <= 0.0 {
                break;
            }
            for i in 0..n {
                d[i] += t * p[i];
            }
        }
    }

    // Tangential phase: projected descent on the objective. Constraint
    // gradients are negated and normalized so that a positive product with
    // the step consumes slack, the orientation the engine expects.
    let mut amat = Mat::<E>::zeros(n, m);
    let mut scale = Col::<E>::zeros(m);
    for j in 0..m {
        let gn = congrad.col(j).norm_l2();
        scale[j] = gn;
        if gn > E::EPSILON {
            for i in 0..n {
                amat[(i, j)] = -congrad[(i, j)] / gn;
            }
        }
    }

    ws.reset();
    for _ in 0..TANGENTIAL_STEPS {
        let dd = dot(d.as_ref(), d.as_ref());
        let slack2 = delta * delta - dd;
        if slack2 <= 1e-4 * delta * delta {
            break;
        }
        let snorm = slack2.sqrt();

        let snorm_units = Col::from_fn(m, |j| {
            let s = con[j] + dot(congrad.col(j), d.as_ref());
            if scale[j] > E::EPSILON { (s / scale[j]).max(0.0) } else { E::INFINITY }
        });
        ws.update_slacks(snorm_units.as_ref());

        let dstep = getact(amat.as_ref(), fgrad, snorm, ws);
        if dot(dstep.as_ref(), dstep.as_ref()) <= 0.0 {
            break;
        }
        if dot(fgrad, dstep.as_ref()) >= 0.0 {
            break;
        }

        // Step to the trust-region boundary or the first crossing of a
        // strictly satisfied constraint, whichever comes first.
        let mut alpha = step_to_ball(d.as_ref(), dstep.as_ref(), delta);
        for j in 0..m {
            if scale[j] <= E::EPSILON {
                continue;
            }
            let s = con[j] + dot(congrad.col(j), d.as_ref());
            let rate = dot(congrad.col(j), dstep.as_ref());
            if rate < 0.0 && s > 0.0 {
                alpha = E::min(alpha, s / -rate);
            }
        }
        if alpha <= 0.0 {
            break;
        }
        let hit_boundary = alpha >= step_to_ball(d.as_ref(), dstep.as_ref(), delta) - E::EPSILON;
        for i in 0..n {
            d[i] += alpha * dstep[i];
        }
        if hit_boundary {
            break;
        }
    }

    let preref = -dot(fgrad, d.as_ref());
    let prerec = (cv0 - linearized_violation(con, congrad, d.as_ref())).max(0.0);
    TrustStep {
        d,
        preref,
        prerec,
        zero_grad,
    }
}
