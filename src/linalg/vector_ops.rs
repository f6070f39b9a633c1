use faer::{ColRef, MatRef, unzip, zip};

use crate::E;

pub(crate) fn dot<'a>(x1: ColRef<'a, E>, x2: ColRef<'a, E>) -> E {
    let mut acc = 0.0;

    zip!(x1, x2).for_each(|unzip!(x1, x2)| acc += *x1 * *x2);

    acc
}

pub(crate) fn norm_inf<'a>(x: ColRef<'a, E>) -> E {
    let mut maximum = 0.0;

    zip!(x).for_each(|unzip!(x)| maximum = E::max(maximum, x.abs()));

    maximum
}

pub(crate) fn contains_nan<'a>(x: ColRef<'a, E>) -> bool {
    let mut res = false;
    zip!(x).for_each(|unzip!(x)| {
        if x.is_nan() {
            res = true
        }
    });
    res
}

#[allow(unused)]
pub(crate) fn is_finite_col<'a>(x: ColRef<'a, E>) -> bool {
    let mut res = true;
    zip!(x).for_each(|unzip!(x)| {
        if !x.is_finite() {
            res = false
        }
    });
    res
}

/// Whether `Q^T Q` matches the identity to within `tol`, entrywise.
pub(crate) fn is_orthogonal<'a>(q: MatRef<'a, E>, tol: E) -> bool {
    let n = q.ncols();
    let qtq = q.transpose() * q;
    let mut res = true;
    for i in 0..n {
        for j in 0..n {
            let target = if i == j { 1.0 } else { 0.0 };
            if (qtq[(i, j)] - target).abs() > tol {
                res = false;
            }
        }
    }
    res
}

/// Whether every entry of `r` strictly below the diagonal is within `tol` of
/// zero.
pub(crate) fn is_upper_triangular<'a>(r: MatRef<'a, E>, tol: E) -> bool {
    let mut res = true;
    for j in 0..r.ncols() {
        for i in (j + 1)..r.nrows() {
            if r[(i, j)].abs() > tol {
                res = false;
            }
        }
    }
    res
}
