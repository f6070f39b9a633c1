//! Rank-one updates of a dense QR factorization.
//!
//! The working-set machinery keeps an orthogonal `Q` and an upper-triangular
//! `R` such that `Q * R[:, 0..nact]` reproduces the active constraint
//! gradients. Columns are appended and retired one at a time, so both
//! operations here are in-place Givens sweeps rather than refactorizations.

use faer::{Col, ColRef, Mat};

use crate::{E, I};

/// Givens rotation `(c, s, r)` with `c*a + s*b = r`, `-s*a + c*b = 0` and
/// `r = hypot(a, b) >= 0`.
pub(crate) fn planerot(a: E, b: E) -> (E, E, E) {
    let r = a.hypot(b);
    if r > 0.0 { (a / r, b / r, r) } else { (1.0, 0.0, 0.0) }
}

/// Applies the rotation to columns `i` and `j` of `mat`.
fn rotate_cols(mat: &mut Mat<E>, i: I, j: I, c: E, s: E) {
    for row in 0..mat.nrows() {
        let a = mat[(row, i)];
        let b = mat[(row, j)];
        mat[(row, i)] = c * a + s * b;
        mat[(row, j)] = -s * a + c * b;
    }
}

/// Appends `c` as column `k` of the factored matrix.
///
/// Forms `y = Q^T c`, annihilates `y[k+1..]` bottom-up by rotations applied
/// to adjacent column pairs of `q` (the matching rows of `r` are zero in the
/// first `k` columns, so `r` needs no sweep), then stores `y[0..=k]` as the
/// new column with a nonnegative diagonal entry. Degenerate columns are the
/// caller's responsibility; a tiny `r[(k, k)]` is tolerated downstream.
pub fn qr_add(c: ColRef<'_, E>, q: &mut Mat<E>, r: &mut Mat<E>, k: I) {
    let n = q.nrows();
    debug_assert!(k < n);

    let mut y: Col<E> = q.transpose() * c;
    for i in ((k + 1)..n).rev() {
        if y[i] != 0.0 {
            let (cs, sn, rr) = planerot(y[i - 1], y[i]);
            y[i - 1] = rr;
            y[i] = 0.0;
            rotate_cols(q, i - 1, i, cs, sn);
        }
    }

    for i in 0..n {
        r[(i, k)] = if i <= k { y[i] } else { 0.0 };
    }
    if r[(k, k)] < 0.0 {
        r[(k, k)] = -r[(k, k)];
        for row in 0..n {
            q[(row, k)] = -q[(row, k)];
        }
    }
}

/// Cyclically shifts active column `ic` to position `nact - 1`.
///
/// Each adjacent swap leaves one subdiagonal entry, removed by a single
/// rotation of rows `(j, j+1)` of `r` and the matching columns of `q`. The
/// diagonal of the shifted block stays strictly positive. No-op when `ic`
/// is already the last active column.
pub fn qr_exchange(q: &mut Mat<E>, r: &mut Mat<E>, ic: I, nact: I) {
    debug_assert!(ic < nact);
    debug_assert!(nact <= q.nrows());

    for j in ic..nact.saturating_sub(1) {
        for row in 0..=(j + 1) {
            let t = r[(row, j)];
            r[(row, j)] = r[(row, j + 1)];
            r[(row, j + 1)] = t;
        }

        let (cs, sn, rr) = planerot(r[(j, j)], r[(j + 1, j)]);
        if rr > 0.0 {
            r[(j, j)] = rr;
            r[(j + 1, j)] = 0.0;
            for col in (j + 1)..nact {
                let a = r[(j, col)];
                let b = r[(j + 1, col)];
                r[(j, col)] = cs * a + sn * b;
                r[(j + 1, col)] = -sn * a + cs * b;
            }
            rotate_cols(q, j, j + 1, cs, sn);
        }

        // Keep the diagonal of the retained block positive.
        if r[(j + 1, j + 1)] < 0.0 {
            for col in (j + 1)..nact {
                r[(j + 1, col)] = -r[(j + 1, col)];
            }
            for row in 0..q.nrows() {
                q[(row, j + 1)] = -q[(row, j + 1)];
            }
        }
    }
}
