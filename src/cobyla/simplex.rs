//! The interpolation simplex and its linear models.
//!
//! `n + 1` affinely independent vertices carry observed objective and
//! constraint values. The inverse of the edge matrix centered at the
//! incumbent yields barycentric coordinates, the vertex-to-face distances
//! used to judge geometry, and the gradients of the linear models that
//! interpolate every observed value.

use faer::linalg::solvers::Solve;
use faer::{Col, ColRef, Mat, MatRef};

use crate::linalg::vector_ops::dot;
use crate::{E, I, Status};

/// A vertex farther than this multiple of the trust radius from the
/// incumbent spoils the geometry.
const GEO_DIST_FACTOR: E = 2.1;
/// A vertex closer than this multiple of the trust radius to its opposite
/// face spoils the geometry.
const GEO_SIG_FACTOR: E = 0.25;
/// Length of the re-interpolation step, as a multiple of the trust radius.
const GEO_STEP_FACTOR: E = 0.5;

/// Barycentric pivots below this threshold route a vertex replacement
/// through a fresh factorization instead of the rank-one update.
const PIVOT_TOL: E = 1e-8;

pub(crate) struct Simplex {
    n: I,
    m: I,
    /// Vertices, one column each; column `kopt` is the incumbent.
    verts: Mat<E>,
    fval: Col<E>,
    conval: Mat<E>,
    cval: Col<E>,
    kopt: I,
    /// Inverse of the edge matrix `S` whose columns are
    /// `verts[:,k] - verts[:,kopt]` for `k != kopt` in vertex order.
    simi: Mat<E>,
    /// Gradient of the linear objective model.
    fgrad: Col<E>,
    /// Gradients of the linear constraint models, one column each.
    congrad: Mat<E>,
}

impl Simplex {
    pub fn new(n: I, m: I) -> Self {
        Self {
            n,
            m,
            verts: Mat::zeros(n, n + 1),
            fval: Col::zeros(n + 1),
            conval: Mat::zeros(m, n + 1),
            cval: Col::zeros(n + 1),
            kopt: 0,
            simi: Mat::zeros(n, n),
            fgrad: Col::zeros(n),
            congrad: Mat::zeros(n, m),
        }
    }

    pub fn n(&self) -> I {
        self.n
    }

    pub fn m(&self) -> I {
        self.m
    }

    pub fn kopt(&self) -> I {
        self.kopt
    }

    pub fn incumbent(&self) -> ColRef<'_, E> {
        self.verts.col(self.kopt)
    }

    pub fn vertex(&self, k: I) -> ColRef<'_, E> {
        self.verts.col(k)
    }

    pub fn f(&self, k: I) -> E {
        self.fval[k]
    }

    pub fn cv(&self, k: I) -> E {
        self.cval[k]
    }

    pub fn constr(&self, k: I) -> ColRef<'_, E> {
        self.conval.col(k)
    }

    pub fn fgrad(&self) -> ColRef<'_, E> {
        self.fgrad.as_ref()
    }

    pub fn congrad(&self) -> MatRef<'_, E> {
        self.congrad.as_ref()
    }

    /// Writes a vertex and its observed values without touching the models;
    /// used while the initial simplex is being filled.
    pub fn set_vertex(&mut self, k: I, x: ColRef<'_, E>, f: E, constr: ColRef<'_, E>, cv: E) {
        for i in 0..self.n {
            self.verts[(i, k)] = x[i];
        }
        for i in 0..self.m {
            self.conval[(i, k)] = constr[i];
        }
        self.fval[k] = f;
        self.cval[k] = cv;
    }

    /// Edge-matrix column holding vertex `k` (`k != kopt`).
    fn edge_of(&self, k: I) -> I {
        debug_assert!(k != self.kopt);
        if k < self.kopt { k } else { k - 1 }
    }

    /// Vertex stored in edge-matrix column `e`.
    fn vertex_of(&self, e: I) -> I {
        if e < self.kopt { e } else { e + 1 }
    }

    /// Moves the incumbent and refreshes the factored state.
    pub fn set_kopt(&mut self, k: I) -> Result<(), Status> {
        self.kopt = k;
        self.refresh()
    }

    /// Rebuilds `simi` and every linear model from a dense factorization of
    /// the edge matrix. Fails when the vertices have lost affine
    /// independence beyond repair.
    pub fn refresh(&mut self) -> Result<(), Status> {
        let n = self.n;
        let mut edges = Mat::<E>::zeros(n, n);
        for e in 0..n {
            let k = self.vertex_of(e);
            for i in 0..n {
                edges[(i, e)] = self.verts[(i, k)] - self.verts[(i, self.kopt)];
            }
        }

        let lu = edges.as_ref().partial_piv_lu();
        self.simi = lu.solve(Mat::<E>::identity(n, n));
        for e in 0..n {
            for i in 0..n {
                if !self.simi[(e, i)].is_finite() {
                    return Err(Status::DamagingRounding);
                }
            }
        }

        self.rebuild_models();
        Ok(())
    }

    /// Model gradients from scratch: `grad = simi^T * (values - value(kopt))`.
    fn rebuild_models(&mut self) {
        let n = self.n;
        let simi_t = self.simi.transpose();

        let dvalf = Col::from_fn(n, |e| self.fval[self.vertex_of(e)] - self.fval[self.kopt]);
        self.fgrad = simi_t * &dvalf;

        for j in 0..self.m {
            let dvalc =
                Col::from_fn(n, |e| self.conval[(j, self.vertex_of(e))] - self.conval[(j, self.kopt)]);
            let grad: Col<E> = simi_t * &dvalc;
            for i in 0..n {
                self.congrad[(i, j)] = grad[i];
            }
        }
    }

    /// Barycentric coordinates of a step from the incumbent.
    pub fn bary(&self, d: ColRef<'_, E>) -> Col<E> {
        &self.simi * d
    }

    /// Distance from vertex `k` to the incumbent.
    pub fn dist(&self, k: I) -> E {
        (self.verts.col(k) - self.verts.col(self.kopt)).norm_l2()
    }

    /// Distance from vertex `k` to the opposite face of the simplex.
    fn vsig(&self, k: I) -> E {
        let rnorm = self.simi.row(self.edge_of(k)).norm_l2();
        if rnorm > 0.0 { 1.0 / rnorm } else { 0.0 }
    }

    /// Whether every vertex is within `GEO_DIST_FACTOR * delta` of the
    /// incumbent and at least `GEO_SIG_FACTOR * delta` from its opposite
    /// face.
    pub fn good_geometry(&self, delta: E) -> bool {
        (0..=self.n)
            .filter(|&k| k != self.kopt)
            .all(|k| self.dist(k) <= GEO_DIST_FACTOR * delta && self.vsig(k) >= GEO_SIG_FACTOR * delta)
    }

    /// The vertex that most violates the geometry criteria.
    pub fn geometry_drop(&self, delta: E) -> I {
        let mut jdrop = if self.kopt == 0 { 1 } else { 0 };
        let mut worst = 0.0;
        for k in 0..=self.n {
            if k == self.kopt {
                continue;
            }
            let offense = E::max(
                self.dist(k) / (GEO_DIST_FACTOR * delta),
                (GEO_SIG_FACTOR * delta) / self.vsig(k).max(E::MIN_POSITIVE),
            );
            if offense > worst {
                worst = offense;
                jdrop = k;
            }
        }
        jdrop
    }

    /// Merit of the linear models at a step from the incumbent.
    pub fn model_merit(&self, d: ColRef<'_, E>, cpen: E) -> E {
        let f = self.fval[self.kopt] + dot(self.fgrad.as_ref(), d);
        let mut viol = 0.0;
        for j in 0..self.m {
            let c = self.conval[(j, self.kopt)] + dot(self.congrad.col(j), d);
            viol = E::max(viol, -c);
        }
        f + cpen * viol
    }

    /// The re-interpolation step for a geometry repair of vertex `jdrop`:
    /// `GEO_STEP_FACTOR * delta` along the normal of the opposite face, with
    /// the sign that promises the lower model merit.
    pub fn geometry_step(&self, jdrop: I, delta: E, cpen: E) -> Col<E> {
        let e = self.edge_of(jdrop);
        let rnorm = self.simi.row(e).norm_l2();
        let v = if rnorm > 0.0 {
            Col::from_fn(self.n, |i| self.simi[(e, i)] / rnorm)
        } else {
            // Degenerate face: fall back to the edge direction itself.
            let d = self.verts.col(jdrop) - self.verts.col(self.kopt);
            let dn = d.norm_l2().max(E::MIN_POSITIVE);
            Col::from_fn(self.n, |i| d[i] / dn)
        };
        let step = GEO_STEP_FACTOR * delta;
        let dplus = Col::from_fn(self.n, |i| step * v[i]);
        let dminus = Col::from_fn(self.n, |i| -step * v[i]);
        if self.model_merit(dplus.as_ref(), cpen) <= self.model_merit(dminus.as_ref(), cpen) {
            dplus
        } else {
            dminus
        }
    }

    /// Picks the vertex a trust-region step should replace, weighing the
    /// distance from the incumbent against the volume change `|t_k|` of the
    /// replacement. Returns `None` when the point improved nothing and
    /// every replacement would shrink the simplex.
    pub fn drop_for_tr(&self, d: ColRef<'_, E>, improved: bool, delta: E, rho: E) -> Option<I> {
        let t = self.bary(d);
        let sigma = E::max(0.1 * delta, rho);

        let mut jdrop = None;
        let mut best = 0.0;
        for k in 0..=self.n {
            if k == self.kopt {
                continue;
            }
            let dist = self.dist(k);
            let weight = E::max(1.0, (dist / sigma).powi(2));
            let score = weight * t[self.edge_of(k)].abs();
            if score > best {
                best = score;
                jdrop = Some(k);
            }
        }

        if improved {
            // The point must enter the simplex; fall back to the farthest
            // vertex when the barycentric scores are all degenerate.
            if jdrop.is_none() || best <= 0.0 {
                jdrop = (0..=self.n)
                    .filter(|&k| k != self.kopt)
                    .max_by(|&a, &b| self.dist(a).total_cmp(&self.dist(b)));
            }
            jdrop
        } else if best > 1.0 {
            jdrop
        } else {
            None
        }
    }

    /// Replaces vertex `jdrop` with a new point and its observed values,
    /// updating `simi` by a Sherman-Morrison column replacement and every
    /// model gradient by the matching rank-one correction. Falls back to a
    /// fresh factorization when the barycentric pivot is unsafe.
    pub fn replace_vertex(
        &mut self,
        jdrop: I,
        x: ColRef<'_, E>,
        f: E,
        constr: ColRef<'_, E>,
        cv: E,
    ) -> Result<(), Status> {
        let n = self.n;
        let e = self.edge_of(jdrop);
        let snew = Col::from_fn(n, |i| x[i] - self.verts[(i, self.kopt)]);
        let t = self.bary(snew.as_ref());
        let pivot = t[e];

        if pivot.abs() <= PIVOT_TOL {
            self.set_vertex(jdrop, x, f, constr, cv);
            return self.refresh();
        }

        // Model mismatches at the new point, measured before the update.
        let gamma_f = f - (self.fval[self.kopt] + dot(self.fgrad.as_ref(), snew.as_ref()));
        let gamma_c = Col::from_fn(self.m, |j| {
            constr[j] - (self.conval[(j, self.kopt)] + dot(self.congrad.col(j), snew.as_ref()))
        });

        // Sherman-Morrison update of the inverse for the replaced column.
        for i in 0..n {
            self.simi[(e, i)] /= pivot;
        }
        for r in 0..n {
            if r != e {
                let factor = t[r];
                for i in 0..n {
                    self.simi[(r, i)] -= factor * self.simi[(e, i)];
                }
            }
        }

        // Rank-one corrections keep every model interpolating the retained
        // vertices while matching the new observation.
        let w = Col::from_fn(n, |i| self.simi[(e, i)]);
        for i in 0..n {
            self.fgrad[i] += gamma_f * w[i];
        }
        for j in 0..self.m {
            for i in 0..n {
                self.congrad[(i, j)] += gamma_c[j] * w[i];
            }
        }

        self.set_vertex(jdrop, x, f, constr, cv);
        Ok(())
    }

    /// Largest interpolation mismatch of the objective model over the
    /// vertices.
    #[cfg(test)]
    pub fn interpolation_residual(&self) -> E {
        let mut worst = 0.0;
        for k in 0..=self.n {
            if k == self.kopt {
                continue;
            }
            let s = self.verts.col(k) - self.verts.col(self.kopt);
            let predicted = self.fval[self.kopt] + dot(self.fgrad.as_ref(), s.as_ref());
            worst = E::max(worst, (predicted - self.fval[k]).abs());
        }
        worst
    }
}
