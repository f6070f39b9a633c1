//! End-to-end scenarios for the COBYLA driver.

use faer::Col;
use rstest::rstest;
use rstest_reuse::{apply, template};

use crate::callback::Verbosity;
use crate::cobyla::driver::Cobylb;
use crate::cobyla::{Cobyla, CobylaOptions, SolverSnapshot, cobyla, resolve};
use crate::{E, Status};

fn rosenbrock(x: &[E], _constr: &mut [E]) -> E {
    100.0 * (x[1] - x[0] * x[0]).powi(2) + (1.0 - x[0]).powi(2)
}

#[test]
fn test_rosenbrock_unconstrained() {
    let mut calcfc = rosenbrock;
    let result = Cobyla::new()
        .with_trust_region(0.5, 1e-8)
        .with_maxfun(50_000)
        .minimize(&mut calcfc, &[-1.2, 1.0], 0)
        .unwrap();

    assert_eq!(result.status, Status::SmallTrustRadius);
    assert!((result.x[0] - 1.0).abs() <= 1e-4, "x = {:?}", result.x);
    assert!((result.x[1] - 1.0).abs() <= 1e-4, "x = {:?}", result.x);
    assert!(result.f <= 1e-8, "f = {:e}", result.f);
    assert_eq!(result.cv, 0.0);
    assert!(result.nf <= 50_000);
}

#[test]
fn test_linear_objective_on_disc() {
    // Maximize x + y inside the unit disc; the optimum sits on the boundary
    // at (1/sqrt 2, 1/sqrt 2) with objective -sqrt 2.
    let mut calcfc = |x: &[E], constr: &mut [E]| {
        constr[0] = 1.0 - x[0] * x[0] - x[1] * x[1];
        -x[0] - x[1]
    };
    let result = Cobyla::new()
        .with_trust_region(0.5, 1e-8)
        .with_ctol(1e-6)
        .with_maxfun(10_000)
        .minimize(&mut calcfc, &[0.0, 0.0], 1)
        .unwrap();

    let target = E::sqrt(0.5);
    assert_eq!(result.status, Status::SmallTrustRadius);
    assert!(result.cv <= 1e-6, "cv = {:e}", result.cv);
    assert!((result.f + E::sqrt(2.0)).abs() <= 1e-4, "f = {}", result.f);
    assert!((result.x[0] - target).abs() <= 1e-2, "x = {:?}", result.x);
    assert!((result.x[1] - target).abs() <= 1e-2, "x = {:?}", result.x);
}

#[test]
fn test_infeasible_start() {
    // The feasible region {x >= 2, y >= 2} excludes the starting point; the
    // solver must first recover feasibility and then settle on the corner.
    let mut calcfc = |x: &[E], constr: &mut [E]| {
        constr[0] = x[0] - 2.0;
        constr[1] = x[1] - 2.0;
        x[0] * x[0] + x[1] * x[1]
    };
    let result = Cobyla::new()
        .with_trust_region(1.0, 1e-7)
        .with_ctol(1e-6)
        .with_maxfun(5_000)
        .minimize(&mut calcfc, &[0.0, 0.0], 2)
        .unwrap();

    assert!(result.cv <= 1e-6, "cv = {:e}", result.cv);
    assert!((result.x[0] - 2.0).abs() <= 1e-3, "x = {:?}", result.x);
    assert!((result.x[1] - 2.0).abs() <= 1e-3, "x = {:?}", result.x);
}

#[test]
fn test_nan_at_third_evaluation() {
    // The third evaluation is the second coordinate vertex of the initial
    // simplex; the solver must stop there and return the better of the two
    // finite points.
    let mut nf = 0;
    let mut calcfc = |x: &[E], _constr: &mut [E]| {
        nf += 1;
        if nf == 3 {
            E::NAN
        } else {
            (x[0] - 2.0).powi(2) + x[1] * x[1]
        }
    };
    let result = Cobyla::new()
        .with_trust_region(0.5, 1e-6)
        .minimize(&mut calcfc, &[0.0, 0.0], 0)
        .unwrap();

    assert_eq!(result.status, Status::NanInfF);
    assert_eq!(result.nf, 3);
    // f(x0) = 4, f(x0 + 0.5 e1) = 2.25: the second vertex is the incumbent.
    assert_eq!(result.x, vec![0.5, 0.0]);
    assert_eq!(result.f, 2.25);
}

#[test]
fn test_nan_on_first_call() {
    let mut calcfc = |_x: &[E], _constr: &mut [E]| E::NAN;
    let result = Cobyla::new()
        .minimize(&mut calcfc, &[1.0, 2.0], 0)
        .unwrap();

    assert_eq!(result.status, Status::NanInfF);
    assert_eq!(result.nf, 1);
    assert_eq!(result.x, vec![1.0, 2.0]);
    assert!(result.f.is_nan());
}

#[test]
fn test_nan_in_initial_point() {
    let mut calcfc = |x: &[E], _constr: &mut [E]| x[0];
    let result = Cobyla::new()
        .minimize(&mut calcfc, &[E::NAN, 0.0], 0)
        .unwrap();

    assert_eq!(result.status, Status::NanInX);
    assert_eq!(result.nf, 0);
}

#[test]
fn test_one_dimensional_problem() {
    let mut calcfc = |x: &[E], _constr: &mut [E]| (x[0] - 3.0).powi(2);
    let result = Cobyla::new()
        .with_trust_region(0.5, 1e-6)
        .minimize(&mut calcfc, &[0.0], 0)
        .unwrap();

    assert_eq!(result.status, Status::SmallTrustRadius);
    assert!((result.x[0] - 3.0).abs() <= 1e-3, "x = {:?}", result.x);
}

#[test]
fn test_rhoend_above_rhobeg_is_clamped() {
    let mut calcfc = |x: &[E], _constr: &mut [E]| x[0] * x[0] + x[1] * x[1];
    let result = Cobyla::new()
        .with_trust_region(0.5, 2.0)
        .minimize(&mut calcfc, &[1.0, 1.0], 0)
        .unwrap();

    // rhoend is clamped to rhobeg, so the very first stall terminates the
    // outer loop.
    assert_eq!(result.status, Status::SmallTrustRadius);
    assert!(result.nf < 100);
}

#[test]
fn test_maxfun_is_honored() {
    let mut calcfc = |x: &[E], _constr: &mut [E]| (x[0] - 3.0).powi(2) + x[1] * x[1];
    let result = Cobyla::new()
        .with_trust_region(1.0, 1e-10)
        .with_maxfun(7)
        .minimize(&mut calcfc, &[0.0, 0.0], 0)
        .unwrap();

    assert_eq!(result.status, Status::MaxFunReached);
    assert_eq!(result.nf, 7);
}

#[test]
fn test_ftarget_stops_early() {
    let mut calcfc = |x: &[E], _constr: &mut [E]| -x[0];
    let result = Cobyla::new()
        .with_trust_region(1.0, 1e-8)
        .with_ftarget(-5.0)
        .with_maxfun(10_000)
        .minimize(&mut calcfc, &[0.0, 0.0], 0)
        .unwrap();

    assert_eq!(result.status, Status::TargetAchieved);
    assert!(result.f <= -5.0);
}

#[test]
fn test_seeded_start_skips_one_evaluation() {
    let problem = |x: &[E], constr: &mut [E]| {
        constr[0] = 1.0 - x[0];
        x[0] * x[0] + x[1] * x[1]
    };

    let mut plain = problem;
    let unseeded = Cobyla::new()
        .with_trust_region(0.5, 1e-4)
        .minimize(&mut plain, &[0.0, 0.0], 1)
        .unwrap();

    // Seeding with the true values at the starting point must reproduce the
    // unseeded trajectory with exactly one evaluation less.
    let mut seeded_fn = problem;
    let seeded = Cobyla::new()
        .with_trust_region(0.5, 1e-4)
        .with_seed(0.0, &[1.0])
        .minimize(&mut seeded_fn, &[0.0, 0.0], 1)
        .unwrap();

    assert_eq!(seeded.nf, unseeded.nf - 1);
    assert_eq!(seeded.x, unseeded.x);
    assert_eq!(seeded.f, unseeded.f);
}

#[template]
#[rstest]
fn quadratic_starts(
    #[values([4.0, -3.0], [10.0, 10.0], [0.5, 0.25])] x0: [E; 2],
) {
}

#[apply(quadratic_starts)]
fn test_quadratic_bowl_converges(x0: [E; 2]) {
    let mut calcfc = |x: &[E], _constr: &mut [E]| x[0] * x[0] + x[1] * x[1];
    let options = CobylaOptions {
        rhobeg: 1.0,
        rhoend: 1e-5,
        ..Default::default()
    };
    let result = cobyla(&mut calcfc, &x0, 0, &options).unwrap();

    assert_eq!(result.status, Status::SmallTrustRadius);
    assert!(result.x[0].abs() <= 1e-3, "x = {:?}", result.x);
    assert!(result.x[1].abs() <= 1e-3, "x = {:?}", result.x);
}

#[apply(quadratic_starts)]
fn test_histories_are_recorded_and_trimmed(x0: [E; 2]) {
    let mut calcfc = |x: &[E], _constr: &mut [E]| x[0] * x[0] + x[1] * x[1];
    let options = CobylaOptions {
        rhobeg: 1.0,
        rhoend: 1e-4,
        maxhist: Some(20),
        ..Default::default()
    };
    let result = cobyla(&mut calcfc, &x0, 0, &options).unwrap();

    assert_eq!(result.history.len(), 20.min(result.nf));
    assert_eq!(result.history.xhist().ncols(), result.history.len());
    assert_eq!(result.history.fhist().nrows(), result.history.len());
    // History is append-only from the first evaluation: the second recorded
    // point is the first coordinate vertex.
    assert_eq!(result.history.xhist()[(0, 1)], x0[0] + 1.0);
}

/// The outer radius never grows and the penalty never shrinks (the
/// monotonicity invariants of the radius and merit schedules).
#[test]
fn test_rho_and_penalty_are_monotone() {
    let mut calcfc = |x: &[E], constr: &mut [E]| {
        constr[0] = 1.0 - x[0] * x[0] - x[1] * x[1];
        -x[0] - x[1]
    };
    let options = CobylaOptions {
        rhobeg: 0.5,
        rhoend: 1e-4,
        ..Default::default()
    };
    let resolved = resolve(2, 1, &options).unwrap();
    let x0 = Col::from_fn(2, |_| 0.0);
    let mut driver = Cobylb::new(&mut calcfc, x0, resolved);
    driver.initialize().unwrap();

    let (mut rho, _) = driver.radii();
    let mut cpen = driver.penalty();
    loop {
        let done = driver.iterate().is_err();
        let (rho_now, delta_now) = driver.radii();
        assert!(rho_now <= rho);
        assert!(delta_now >= rho_now);
        assert!(driver.penalty() >= cpen);
        rho = rho_now;
        cpen = driver.penalty();
        if done {
            break;
        }
    }
}

/// Serializing the state after initialization and resuming from the
/// restored snapshot reproduces an uninterrupted run exactly.
#[test]
fn test_snapshot_round_trip_is_deterministic() {
    let problem = |x: &[E], constr: &mut [E]| {
        constr[0] = 1.0 - x[0] * x[0] - x[1] * x[1];
        -x[0] - x[1]
    };
    let options = CobylaOptions {
        rhobeg: 0.5,
        rhoend: 1e-6,
        ctol: 1e-6,
        ..Default::default()
    };
    let x0 = Col::from_fn(2, |_| 0.0);

    // Interrupted run: initialize, serialize, restore, continue.
    let mut calcfc = problem;
    let mut driver = Cobylb::new(&mut calcfc, x0.clone(), resolve(2, 1, &options).unwrap());
    driver.initialize().unwrap();
    let snapshot = driver.snapshot();
    let encoded = serde_json::to_string(&snapshot).unwrap();
    let restored: SolverSnapshot = serde_json::from_str(&encoded).unwrap();
    assert_eq!(restored, snapshot);

    let mut calcfc_resumed = problem;
    let resumed = Cobylb::new(&mut calcfc_resumed, x0.clone(), resolve(2, 1, &options).unwrap())
        .resume(&restored);

    // Uninterrupted run.
    let mut calcfc_direct = problem;
    let direct = Cobylb::new(&mut calcfc_direct, x0, resolve(2, 1, &options).unwrap()).run();

    assert_eq!(resumed.status, direct.status);
    assert_eq!(resumed.nf, direct.nf);
    assert_eq!(resumed.x, direct.x);
    assert_eq!(resumed.f, direct.f);
    assert_eq!(resumed.cv, direct.cv);
}

/// Verbose runs exercise the reporting callbacks without disturbing the
/// result.
#[test]
fn test_iprint_levels_agree() {
    let run = |iprint: Verbosity| {
        let mut calcfc = |x: &[E], _constr: &mut [E]| (x[0] - 1.0).powi(2);
        Cobyla::new()
            .with_trust_region(0.5, 1e-4)
            .with_iprint(iprint)
            .minimize(&mut calcfc, &[0.0], 0)
            .unwrap()
    };
    let silent = run(Verbosity::Silent);
    let loud = run(Verbosity::EveryEval);
    assert_eq!(silent.x, loud.x);
    assert_eq!(silent.nf, loud.nf);
    assert_eq!(silent.status, loud.status);
}
