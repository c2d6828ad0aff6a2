//! Shared harness for the integration suites: run a source program
//! through a VM with a collecting writer and return what it printed.

use blade::{CollectStringEcho, RunOutcome, Vm};

/// Runs `source` as a top-level script, returning stdout text and the
/// outcome.
pub fn run(source: &str) -> (String, RunOutcome) {
    let mut echo = CollectStringEcho::new();
    let mut vm = Vm::new(&mut echo);
    let outcome = vm.run_source(source, "<test>");
    vm.shutdown();
    drop(vm);
    (echo.into_output(), outcome)
}

/// Runs `source` expecting success, returning stdout text.
#[track_caller]
pub fn run_ok(source: &str) -> String {
    let (output, outcome) = run(source);
    assert_eq!(outcome, RunOutcome::Ok, "program failed; output so far: {output:?}");
    output
}

/// Runs `source` expecting a runtime error, returning stdout text.
#[track_caller]
#[allow(dead_code)]
pub fn run_runtime_err(source: &str) -> String {
    let (output, outcome) = run(source);
    assert_eq!(outcome, RunOutcome::RuntimeErr, "expected runtime error; output: {output:?}");
    output
}
