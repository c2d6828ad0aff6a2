//! End-to-end programs exercising the language core: closures, classes,
//! iteration, switch dispatch, and string interpolation.

mod common;

use common::run_ok;
use pretty_assertions::assert_eq;

#[test]
fn closure_counter_increments_shared_state() {
    let output = run_ok(
        "def make() { var n = 0; def inc() { n = n + 1; return n } return inc }\n\
         var c = make(); echo c(); echo c(); echo c()",
    );
    assert_eq!(output, "1\n2\n3\n");
}

#[test]
fn closures_from_separate_calls_are_independent() {
    let output = run_ok(
        "def make() { var n = 0; def inc() { n = n + 1; return n } return inc }\n\
         var a = make()\nvar b = make()\necho a()\necho a()\necho b()",
    );
    assert_eq!(output, "1\n2\n1\n");
}

#[test]
fn method_dispatch_follows_inheritance() {
    let output = run_ok(
        "class A { greet() { return \"A\" } }\n\
         class B < A { greet() { return parent.greet() + \"B\" } }\n\
         echo B().greet()",
    );
    assert_eq!(output, "AB\n");
}

#[test]
fn dict_iteration_yields_keys_in_insertion_order() {
    let output = run_ok("for k, v in {a:1, b:2, c:3} { echo k + \"=\" + v }");
    assert_eq!(output, "a=1\nb=2\nc=3\n");
}

#[test]
fn exception_with_finally_runs_both_blocks() {
    let output = run_ok(
        "try { die Exception(\"boom\") }\n\
         catch Exception as e { echo \"caught:\" + e.message }\n\
         finally { echo \"done\" }",
    );
    assert_eq!(output, "caught:boom\ndone\n");
}

#[test]
fn using_with_literal_labels_selects_a_case() {
    let output = run_ok(
        "using 2 { when 1 { echo \"a\" } when 2 { echo \"b\" } default { echo \"c\" } }",
    );
    assert_eq!(output, "b\n");
}

#[test]
fn using_falls_back_to_default() {
    let output = run_ok(
        "using 9 { when 1 { echo \"a\" } when 2 { echo \"b\" } default { echo \"c\" } }",
    );
    assert_eq!(output, "c\n");
}

#[test]
fn using_with_expression_labels_compares_at_runtime() {
    let output = run_ok(
        "var two = 2\n\
         using 2 { when two { echo \"matched\" } default { echo \"missed\" } }",
    );
    assert_eq!(output, "matched\n");
}

#[test]
fn interpolation_and_slicing() {
    let output = run_ok("var s = \"Hello\"; echo \"${s[1,4]}!\"");
    assert_eq!(output, "ell!\n");
}

#[test]
fn interpolation_nests_expressions() {
    let output = run_ok("var n = 3\necho \"n=${n} twice=${n * 2}.\"");
    assert_eq!(output, "n=3 twice=6.\n");
}

#[test]
fn while_and_compound_assignment() {
    let output = run_ok("var x = 10\nvar total = 0\nwhile x > 0 { total += x\n x -= 1 }\necho total");
    assert_eq!(output, "55\n");
}

#[test]
fn iter_statement_counts_with_step() {
    let output = run_ok("iter var i = 0; i < 3; i++ { echo i }");
    assert_eq!(output, "0\n1\n2\n");
}

#[test]
fn iter_continue_runs_the_step() {
    let output = run_ok(
        "iter var i = 0; i < 5; i++ { if i % 2 == 1 { continue }\n echo i }",
    );
    assert_eq!(output, "0\n2\n4\n");
}

#[test]
fn for_over_list_binds_index_and_value() {
    let output = run_ok("for i, v in [10, 20, 30] { echo i + \":\" + v }");
    assert_eq!(output, "0:10\n1:20\n2:30\n");
}

#[test]
fn for_over_list_single_variable_binds_elements() {
    let output = run_ok("for v in [7, 8] { echo v }");
    assert_eq!(output, "7\n8\n");
}

#[test]
fn for_over_string_yields_characters() {
    let output = run_ok("for c in \"abc\" { echo c }");
    assert_eq!(output, "a\nb\nc\n");
}

#[test]
fn range_iteration_walks_both_directions() {
    assert_eq!(run_ok("for x in 1..4 { echo x }"), "1\n2\n3\n");
    assert_eq!(run_ok("for x in 4..1 { echo x }"), "4\n3\n2\n");
    assert_eq!(run_ok("for x in 2..2 { echo x }\necho \"end\""), "end\n");
}

#[test]
fn break_and_continue_in_for_loops() {
    let output = run_ok(
        "for v in [1, 2, 3, 4, 5] { if v == 2 { continue }\n if v == 4 { break }\n echo v }",
    );
    assert_eq!(output, "1\n3\n");
}

#[test]
fn user_classes_implement_the_iterator_protocol() {
    let output = run_ok(
        "class Pair {\n\
           Pair(a, b) { self.a = a\n self.b = b }\n\
           @iter(i) { if i == 0 { return 0 } if i == 1 { return 1 } return empty }\n\
           @itern(key) { if key == 0 { return self.a } return self.b }\n\
         }\n\
         for v in Pair(5, 9) { echo v }",
    );
    assert_eq!(output, "5\n9\n");
}

#[test]
fn class_fields_default_per_instance() {
    let output = run_ok(
        "class Counter { var count = 0\n bump() { self.count += 1\n return self.count } }\n\
         var a = Counter()\nvar b = Counter()\necho a.bump()\necho a.bump()\necho b.bump()",
    );
    assert_eq!(output, "1\n2\n1\n");
}

#[test]
fn static_members_resolve_on_the_class() {
    let output = run_ok(
        "class Config { static var version = 3\n static describe() { return \"v\" } }\n\
         echo Config.version\necho Config.describe()",
    );
    assert_eq!(output, "3\nv\n");
}

#[test]
fn initializer_receives_constructor_arguments() {
    let output = run_ok(
        "class Point { Point(x, y) { self.x = x\n self.y = y } }\n\
         var p = Point(3, 4)\necho p.x + p.y",
    );
    assert_eq!(output, "7\n");
}

#[test]
fn private_methods_work_through_self() {
    let output = run_ok(
        "class Box { _secret() { return 42 }\n open() { return self._secret() } }\n\
         echo Box().open()",
    );
    assert_eq!(output, "42\n");
}

#[test]
fn bound_methods_carry_their_receiver() {
    let output = run_ok(
        "class Greeter { Greeter(name) { self.name = name }\n hello() { return \"hi \" + self.name } }\n\
         var m = Greeter(\"ada\").hello\necho m()",
    );
    assert_eq!(output, "hi ada\n");
}

#[test]
fn inherited_fields_copy_to_subclasses() {
    let output = run_ok(
        "class Base { var tag = \"base\" }\n\
         class Child < Base { show() { return self.tag } }\n\
         echo Child().show()",
    );
    assert_eq!(output, "base\n");
}

#[test]
fn ternary_and_logical_operators_short_circuit() {
    let output = run_ok(
        "echo true ? \"yes\" : \"no\"\n\
         echo false and 1\n\
         echo true or 2\n\
         echo false or \"fallback\"",
    );
    assert_eq!(output, "yes\nfalse\ntrue\nfallback\n");
}

#[test]
fn arithmetic_and_bitwise_operators() {
    let output = run_ok(
        "echo 7 // 2\necho 7 % 4\necho 2 ** 10\necho 6 & 3\necho 6 | 3\necho 6 ^ 3\n\
         echo 1 << 4\necho 32 >> 2\necho ~0\necho true + 1",
    );
    assert_eq!(output, "3\n3\n1024\n2\n7\n5\n16\n8\n-1\n2\n");
}

#[test]
fn add_overloads_concatenate() {
    let output = run_ok(
        "echo \"n=\" + 4\necho [1] + [2, 3]\necho \"ab\" * 3\necho [0] * 2",
    );
    assert_eq!(output, "n=4\n[1, 2, 3]\nababab\n[0, 0]\n");
}

#[test]
fn variadic_functions_collect_the_tail() {
    let output = run_ok(
        "def f(first, ...) { return __args__.length() }\n\
         echo f(1)\necho f(1, 2, 3)",
    );
    assert_eq!(output, "0\n2\n");
}

#[test]
fn missing_arguments_pad_with_nil() {
    let output = run_ok("def g(a, b) { return b }\necho g(1)");
    assert_eq!(output, "nil\n");
}

#[test]
fn empty_is_distinct_from_nil_in_methods() {
    let output = run_ok(
        "class Probe { check() { return empty == nil } }\n\
         echo Probe().check()",
    );
    assert_eq!(output, "false\n");
}

#[test]
fn negative_numbers_are_falsey() {
    let output = run_ok("if -1 { echo \"t\" } else { echo \"f\" }");
    assert_eq!(output, "f\n");
}
