use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use crate::{E, I, Status};

/// Reporting level requested through the `iprint` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Verbosity {
    #[default]
    /// No output.
    Silent,
    /// A one-line summary at exit.
    ExitOnly,
    /// Exit summary plus each trust-radius reduction.
    RhoChanges,
    /// Exit summary, trust-radius reductions, and every evaluation.
    EveryEval,
}

impl From<u8> for Verbosity {
    fn from(level: u8) -> Self {
        match level {
            0 => Verbosity::Silent,
            1 => Verbosity::ExitOnly,
            2 => Verbosity::RhoChanges,
            _ => Verbosity::EveryEval,
        }
    }
}

/// Hooks invoked by the driver for progress reporting.
#[enum_dispatch]
pub trait Callback {
    /// Called after each evaluation of the user callback.
    fn on_eval(&mut self, _nf: I, _f: E, _cv: E) {}

    /// Called each time the outer trust radius is reduced.
    fn on_rho_change(&mut self, _rho: E, _nf: I, _f: E, _cv: E) {}

    /// Called once when the solver terminates.
    fn on_exit(&mut self, _status: Status, _nf: I, _f: E, _cv: E) {}
}

/// A callback that does nothing. Use when no output is needed.
pub struct SilentCallback {}

impl Callback for SilentCallback {}

/// Prints a one-line summary when the solver terminates.
pub struct ExitReport {}

impl Callback for ExitReport {
    fn on_exit(&mut self, status: Status, nf: I, f: E, cv: E) {
        println!(
            "Exit {:?} (code {:?}) | nf {:4} | f {:<12.6e} | cv {:<10.4e}",
            status,
            status.code(),
            nf,
            f,
            cv
        );
    }
}

/// Prints each trust-radius reduction and the exit summary.
pub struct RhoReport {
    exit: ExitReport,
}

impl Callback for RhoReport {
    fn on_rho_change(&mut self, rho: E, nf: I, f: E, cv: E) {
        println!(
            "| rho {:<10.4e} | nf {:4} | f {:<12.6e} | cv {:<10.4e} |",
            rho, nf, f, cv
        );
    }

    fn on_exit(&mut self, status: Status, nf: I, f: E, cv: E) {
        self.exit.on_exit(status, nf, f, cv);
    }
}

/// Prints every function evaluation, trust-radius reductions, and the exit
/// summary.
pub struct EvalReport {
    rho: RhoReport,
}

impl Callback for EvalReport {
    fn on_eval(&mut self, nf: I, f: E, cv: E) {
        println!("| {:4}: | f {:<12.6e} | cv {:<10.4e} |", nf, f, cv);
    }

    fn on_rho_change(&mut self, rho: E, nf: I, f: E, cv: E) {
        self.rho.on_rho_change(rho, nf, f, cv);
    }

    fn on_exit(&mut self, status: Status, nf: I, f: E, cv: E) {
        self.rho.on_exit(status, nf, f, cv);
    }
}

/// Progress reporters selectable through [`Verbosity`]. Each variant
/// corresponds to one reporting level.
#[enum_dispatch(Callback)]
pub enum Callbacks {
    Silent(SilentCallback),
    Exit(ExitReport),
    Rho(RhoReport),
    Eval(EvalReport),
}

impl From<Verbosity> for Callbacks {
    fn from(level: Verbosity) -> Self {
        match level {
            Verbosity::Silent => Callbacks::Silent(SilentCallback {}),
            Verbosity::ExitOnly => Callbacks::Exit(ExitReport {}),
            Verbosity::RhoChanges => Callbacks::Rho(RhoReport { exit: ExitReport {} }),
            Verbosity::EveryEval => Callbacks::Eval(EvalReport {
                rho: RhoReport { exit: ExitReport {} },
            }),
        }
    }
}
