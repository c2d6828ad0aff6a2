//! Intrinsic functions and per-type method behavior.

mod common;

use common::run_ok;
use pretty_assertions::assert_eq;

#[test]
fn string_methods_cover_the_common_cases() {
    let output = run_ok(
        "echo \"Hello\".length()\n\
         echo \"Hello\".upper()\n\
         echo \"HELLO\".lower()\n\
         echo \"  pad  \".trim()\n\
         echo \"xxabxx\".trim(\"x\")\n\
         echo \"a,b,c\".split(\",\")\n\
         echo \"-\".join([1, 2, 3])\n\
         echo \"hello\".index_of(\"ll\")\n\
         echo \"hello\".starts_with(\"he\")\n\
         echo \"hello\".ends_with(\"lo\")\n\
         echo \"banana\".count(\"an\")\n\
         echo \"5\".lpad(3, \"0\")\n\
         echo \"5\".rpad(3)",
    );
    assert_eq!(
        output,
        "5\nHELLO\nhello\npad\nab\n['a', 'b', 'c']\n1-2-3\n2\ntrue\ntrue\n2\n005\n5  \n"
    );
}

#[test]
fn string_pattern_methods_use_regular_expressions() {
    let output = run_ok(
        "echo \"cat hat bat\".match(\"[ch]at\")\n\
         echo \"cat hat bat\".matches(\"[chb]at\")\n\
         echo \"no digits\".match(\"[0-9]+\")\n\
         echo \"a1b22c\".replace(\"[0-9]+\", \"#\")",
    );
    assert_eq!(output, "cat\n['cat', 'hat', 'bat']\nfalse\na#b#c\n");
}

#[test]
fn string_predicates() {
    let output = run_ok(
        "echo \"abc\".is_alpha()\necho \"a1\".is_alpha()\necho \"a1\".is_alnum()\n\
         echo \"123\".is_number()\necho \"abc\".is_lower()\necho \"ABC\".is_upper()\n\
         echo \" \\t\".is_space()",
    );
    assert_eq!(output, "true\nfalse\ntrue\ntrue\ntrue\ntrue\ntrue\n");
}

#[test]
fn unicode_lengths_and_indexing_are_codepoint_based() {
    let output = run_ok("var s = \"héllo\"\necho s.length()\necho s[1]\necho s[1, 3]");
    assert_eq!(output, "5\né\nél\n");
}

#[test]
fn list_methods_mutate_and_query() {
    let output = run_ok(
        "var l = [3, 1, 2]\n\
         l.append(4)\necho l\n\
         echo l.length()\n\
         l.sort()\necho l\n\
         echo l.index_of(3)\n\
         echo l.contains(9)\n\
         echo l.first() + l.last()\n\
         echo l.pop()\necho l\n\
         l.insert(0, 0)\necho l\n\
         echo l.shift()\necho l",
    );
    assert_eq!(
        output,
        "[3, 1, 2, 4]\n4\n[1, 2, 3, 4]\n2\nfalse\n5\n4\n[1, 2, 3]\n[0, 1, 2, 3]\n0\n[1, 2, 3]\n"
    );
}

#[test]
fn list_transformations_return_new_lists() {
    let output = run_ok(
        "var l = [1, nil, 2, nil, 1]\n\
         echo l.compact()\n\
         echo l.unique()\n\
         echo [1, 2, 3].take(2)\n\
         echo [1, 2].zip([\"a\", \"b\"])\n\
         echo [5, 6].to_dict()",
    );
    assert_eq!(
        output,
        "[1, 2, 1]\n[1, nil, 2]\n[1, 2]\n[[1, 'a'], [2, 'b']]\n{0: 5, 1: 6}\n"
    );
}

#[test]
fn dict_methods_preserve_insertion_order() {
    let output = run_ok(
        "var d = {a: 1, b: 2, c: 3}\n\
         echo d.keys()\n\
         echo d.values()\n\
         echo d.remove(\"b\")\n\
         echo d.keys()\n\
         d.set(\"d\", 4)\n\
         echo d.length()\n\
         echo d.contains(\"a\")\n\
         echo d.find_key(3)\n\
         echo d.to_list()",
    );
    assert_eq!(
        output,
        "['a', 'b', 'c']\n[1, 2, 3]\n2\n['a', 'c']\n4\ntrue\nc\n[['a', 1], ['c', 3], ['d', 4]]\n"
    );
}

#[test]
fn dict_property_access_reads_data_keys() {
    let output = run_ok("var d = {name: \"ada\"}\necho d.name");
    assert_eq!(output, "ada\n");
}

#[test]
fn bytes_round_trip_and_mutation() {
    let output = run_ok(
        "var b = \"hi\".to_bytes()\n\
         echo b.length()\n\
         echo b.to_string()\n\
         b.append(33)\n\
         echo b.to_string()\n\
         echo b[0]\n\
         echo bytes([104, 105]).to_string()\n\
         echo (bytes(2) + bytes([1])).length()",
    );
    assert_eq!(output, "2\nhi\nhi!\n104\nhi\n3\n");
}

#[test]
fn range_methods_expose_bounds() {
    let output = run_ok(
        "var r = 2..7\necho r.lower()\necho r.upper()\necho r.range()\n\
         echo r.within(4)\necho r.within(9)\n\
         var back = 7..2\necho back.lower()\necho back.range()",
    );
    assert_eq!(output, "2\n7\n5\ntrue\nfalse\n2\n-5\n");
}

#[test]
fn conversions_round_trip() {
    let output = run_ok(
        "echo to_number(\"3.5\")\n\
         echo to_string(3.5)\n\
         echo to_string(to_number(\"42\"))\n\
         echo to_int(9.7)\n\
         echo to_bool(0)\n\
         echo to_bool(-1)\n\
         echo to_list(\"ab\")\n\
         echo to_list(1..4)",
    );
    assert_eq!(output, "3.5\n3.5\n42\n9\ntrue\nfalse\n['a', 'b']\n[1, 2, 3]\n");
}

#[test]
fn numeric_intrinsics() {
    let output = run_ok(
        "echo abs(-4)\necho max(1, 9, 3)\necho min(1, 9, 0)\necho sum(1, 2, 3)\n\
         echo bin(5)\necho hex(255)\necho oct(8)\necho chr(65)\necho ord(\"A\")",
    );
    assert_eq!(output, "4\n9\n0\n6\n0b101\n0xff\n0c10\nA\n65\n");
}

#[test]
fn type_introspection() {
    let output = run_ok(
        "echo typeof(1)\necho typeof(\"s\")\necho typeof([])\necho typeof({})\n\
         echo typeof(nil)\necho typeof(1..2)\n\
         echo is_string(\"x\")\necho is_int(2.5)\necho is_int(2)\n\
         echo is_list([])\necho is_iterable({})\necho is_callable(typeof)",
    );
    assert_eq!(
        output,
        "number\nstring\nlist\ndict\nnil\nrange\ntrue\nfalse\ntrue\ntrue\ntrue\ntrue\n"
    );
}

#[test]
fn instance_property_intrinsics() {
    let output = run_ok(
        "class Bag {}\nvar b = Bag()\n\
         echo setprop(b, \"x\", 5)\n\
         echo getprop(b, \"x\")\n\
         echo hasprop(b, \"x\")\n\
         echo delprop(b, \"x\")\n\
         echo hasprop(b, \"x\")",
    );
    assert_eq!(output, "true\n5\ntrue\ntrue\nfalse\n");
}

#[test]
fn print_joins_with_spaces_without_newline() {
    let output = run_ok("print(\"a\", 1, true)\nprint(\"!\")");
    assert_eq!(output, "a 1 true!");
}

#[test]
fn interned_strings_share_identity() {
    // id() exposes the heap handle; equal contents must be handle-equal
    let output = run_ok("var a = \"he\" + \"llo\"\nvar b = \"hello\"\necho id(a) == id(b)");
    assert_eq!(output, "true\n");
}
