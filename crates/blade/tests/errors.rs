//! Exception subsystem and boundary behaviors.

mod common;

use common::{run, run_ok, run_runtime_err};
use blade::RunOutcome;
use pretty_assertions::assert_eq;

#[test]
fn runtime_errors_are_catchable_exceptions() {
    let output = run_ok(
        "try { echo [1, 2][9] } catch Exception as e { echo \"caught\" }",
    );
    assert_eq!(output, "caught\n");
}

#[test]
fn unhandled_exceptions_end_with_a_runtime_error() {
    let output = run_runtime_err("echo \"before\"\ndie Exception(\"stop\")\necho \"after\"");
    assert_eq!(output, "before\n");
}

#[test]
fn finally_runs_on_propagation_and_the_exception_continues() {
    let output = run_ok(
        "try {\n\
           try { die Exception(\"inner\") }\n\
           finally { echo \"f1\" }\n\
         } catch Exception as e { echo \"caught:\" + e.message }\n\
         finally { echo \"f2\" }",
    );
    assert_eq!(output, "f1\ncaught:inner\nf2\n");
}

#[test]
fn die_inside_catch_still_reaches_finally() {
    let output = run_runtime_err(
        "try { die Exception(\"one\") }\n\
         catch Exception as e { echo \"caught\"\n die Exception(\"two\") }\n\
         finally { echo \"cleanup\" }",
    );
    assert_eq!(output, "caught\ncleanup\n");
}

#[test]
fn custom_exception_classes_match_by_lineage() {
    let output = run_ok(
        "class ParseError < Exception {}\n\
         try { die ParseError(\"bad token\") }\n\
         catch Exception as e { echo \"generic:\" + e.message }",
    );
    assert_eq!(output, "generic:bad token\n");
}

#[test]
fn mismatched_catch_class_does_not_swallow() {
    let output = run_ok(
        "class AError < Exception {}\n\
         class BError < Exception {}\n\
         try {\n\
           try { die BError(\"b\") } catch AError as e { echo \"wrong\" }\n\
         } catch BError as e { echo \"right:\" + e.message }",
    );
    assert_eq!(output, "right:b\n");
}

#[test]
fn assertion_failures_raise_assertion_error() {
    let output = run_ok(
        "try { assert 1 == 2, \"math broke\" }\n\
         catch AssertionError as e { echo \"assert:\" + e.message }",
    );
    assert_eq!(output, "assert:math broke\n");
    assert_eq!(run_ok("assert 1 == 1\necho \"fine\""), "fine\n");
}

#[test]
fn die_requires_an_exception_instance() {
    let output = run_ok(
        "try { die \"just a string\" } catch Exception as e { echo e.message }",
    );
    assert_eq!(output, "instance of Exception expected\n");
}

#[test]
fn index_out_of_range_raises() {
    let (_, outcome) = run("var l = [1]\necho l[3]");
    assert_eq!(outcome, RunOutcome::RuntimeErr);
    let (_, outcome) = run("echo \"ab\"[5]");
    assert_eq!(outcome, RunOutcome::RuntimeErr);
}

#[test]
fn missing_dict_key_raises_on_subscript_but_not_get() {
    let output = run_ok("var d = {a: 1}\necho d.get(\"z\")\necho d.get(\"z\", 9)");
    assert_eq!(output, "nil\n9\n");
    let (_, outcome) = run("var d = {a: 1}\necho d[\"z\"]");
    assert_eq!(outcome, RunOutcome::RuntimeErr);
}

#[test]
fn negative_indices_count_from_the_end() {
    let output = run_ok("var s = \"abcde\"\necho s[-1]\necho s[-5]\necho [1, 2, 3][-2]");
    assert_eq!(output, "e\na\n2\n");
}

#[test]
fn slices_clamp_and_reversed_slices_are_empty() {
    let output = run_ok(
        "echo \"hello\"[1, 99]\necho \"hello\"[3, 1].length()\necho [1, 2, 3][5, 9]\necho [1, 2, 3][-2, 99]",
    );
    assert_eq!(output, "ello\n0\n[]\n[2, 3]\n");
}

#[test]
fn assignment_to_string_index_is_an_error() {
    let (_, outcome) = run("var s = \"abc\"\ns[0] = \"z\"");
    assert_eq!(outcome, RunOutcome::RuntimeErr);
}

#[test]
fn undefined_globals_raise() {
    let (_, outcome) = run("echo not_defined_anywhere");
    assert_eq!(outcome, RunOutcome::RuntimeErr);
    let (_, outcome) = run("not_declared = 5");
    assert_eq!(outcome, RunOutcome::RuntimeErr);
}

#[test]
fn private_methods_reject_outside_callers() {
    let (output, outcome) = run(
        "class Box { _secret() { return 1 } }\n\
         echo Box()._secret()",
    );
    assert_eq!(outcome, RunOutcome::RuntimeErr);
    assert_eq!(output, "");
}

#[test]
fn calling_non_callables_raises() {
    let (_, outcome) = run("var n = 5\nn()");
    assert_eq!(outcome, RunOutcome::RuntimeErr);
}

#[test]
fn deep_recursion_overflows_the_frame_stack() {
    let output = run_ok(
        "def spin(n) { return spin(n + 1) }\n\
         try { spin(0) } catch Exception as e { echo e.message }",
    );
    assert_eq!(output, "stack overflow\n");
}

#[test]
fn arity_mismatch_with_extra_arguments_raises() {
    let (_, outcome) = run("def f(a) { return a }\nf(1, 2, 3)");
    assert_eq!(outcome, RunOutcome::RuntimeErr);
}

#[test]
fn compile_errors_never_execute() {
    let (output, outcome) = run("echo \"first\"\nvar = 5");
    assert_eq!(outcome, RunOutcome::CompileErr);
    assert_eq!(output, "");
}

#[test]
fn self_import_is_a_compile_error() {
    // "<test>" resolves nowhere, so a bogus import is a compile error too
    let (_, outcome) = run("import definitely.not.a.module");
    assert_eq!(outcome, RunOutcome::CompileErr);
}
