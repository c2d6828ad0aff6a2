//! Runtime plumbing: module imports, native modules, the REPL session,
//! and collection-under-pressure.

mod common;

use std::fs;
use std::path::PathBuf;

use blade::{CollectStringEcho, ReplSession, RunOutcome, Vm};
use common::run_ok;
use pretty_assertions::assert_eq;

/// A scratch directory for source-module fixtures, removed on drop.
struct Fixture {
    dir: PathBuf,
}

impl Fixture {
    fn new(tag: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("blade-tests-{}-{tag}", std::process::id()));
        fs::create_dir_all(&dir).expect("create fixture dir");
        Self { dir }
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.join(name);
        fs::write(&path, contents).expect("write fixture file");
        path
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

fn run_file(path: &std::path::Path) -> (String, RunOutcome) {
    let mut echo = CollectStringEcho::new();
    let mut vm = Vm::new(&mut echo);
    let outcome = vm.run_file(path);
    vm.shutdown();
    drop(vm);
    (echo.into_output(), outcome)
}

#[test]
fn source_modules_import_and_bind() {
    let fixture = Fixture::new("import");
    fixture.write("vals.b", "var answer = 10\ndef double(n) { return n * 2 }\n");
    let main = fixture.write("main.b", "import vals\necho vals.answer\necho vals.double(21)\n");

    let (output, outcome) = run_file(&main);
    assert_eq!(outcome, RunOutcome::Ok);
    assert_eq!(output, "10\n42\n");
}

#[test]
fn selective_imports_copy_names_and_eject_the_module() {
    let fixture = Fixture::new("select");
    fixture.write("vals.b", "var x = 7\nvar y = 8\n");
    let main = fixture.write("main.b", "import vals { x, y }\necho x + y\n");

    let (output, outcome) = run_file(&main);
    assert_eq!(outcome, RunOutcome::Ok);
    assert_eq!(output, "15\n");
}

#[test]
fn repeat_imports_reuse_the_cached_module() {
    let fixture = Fixture::new("cache");
    fixture.write("counter.b", "echo \"loaded\"\nvar n = 1\n");
    let main = fixture.write(
        "main.b",
        "import counter\nimport counter as again\necho counter.n + again.n\n",
    );

    let (output, outcome) = run_file(&main);
    assert_eq!(outcome, RunOutcome::Ok);
    // the module body runs once; both bindings see the same module
    assert_eq!(output, "loaded\n2\n");
}

#[test]
fn directory_modules_resolve_through_index() {
    let fixture = Fixture::new("indexed");
    fs::create_dir_all(fixture.dir.join("pkg")).expect("create pkg dir");
    fixture.write("pkg/index.b", "var marker = \"from index\"\n");
    let main = fixture.write("main.b", "import pkg\necho pkg.marker\n");

    let (output, outcome) = run_file(&main);
    assert_eq!(outcome, RunOutcome::Ok);
    assert_eq!(output, "from index\n");
}

#[test]
fn native_math_module_exposes_a_class() {
    let output = run_ok(
        "import math\n\
         echo math.Math.sqrt(16)\n\
         echo math.Math.pow(2, 8)\n\
         echo math.Math.floor(3.9)\n\
         echo math.Math.Pi > 3.14",
    );
    assert_eq!(output, "4\n256\n3\ntrue\n");
}

#[test]
fn native_module_members_import_selectively() {
    let output = run_ok("import math { Math }\necho Math.ceil(1.2)");
    assert_eq!(output, "2\n");
}

#[test]
fn native_os_module_exposes_a_class() {
    let output = run_ok(
        "import os\n\
         echo typeof(os.Os.platform)\n\
         echo os.Os.info().contains(\"sysname\")\n\
         echo typeof(os.Os.cwd())\n\
         echo os.Os.env(\"BLADE_SUCH_VAR_DOES_NOT_EXIST\")\n\
         echo os.Os.args()",
    );
    assert_eq!(output, "string\ntrue\nstring\nnil\n[]\n");
}

#[test]
fn script_arguments_surface_through_os_args() {
    let mut echo = CollectStringEcho::new();
    let mut vm = Vm::new(&mut echo);
    vm.set_std_args(vec!["in.txt".to_string(), "out.txt".to_string()]);
    let outcome = vm.run_source(
        "import os\nfor a in os.Os.args() { echo a }\necho os.Os.args().length()",
        "<args>",
    );
    vm.shutdown();
    drop(vm);
    assert_eq!(outcome, RunOutcome::Ok);
    assert_eq!(echo.output(), "in.txt\nout.txt\n2\n");
}

#[test]
fn a_fired_interrupt_abandons_the_evaluation_but_keeps_globals() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let mut echo = CollectStringEcho::new();
    let mut vm = Vm::new(&mut echo);
    let flag = Arc::new(AtomicBool::new(false));
    vm.set_interrupt_flag(Arc::clone(&flag));
    let mut session = ReplSession::new(&mut vm);

    assert_eq!(session.feed_line(&mut vm, "var x = 11"), Some(RunOutcome::Ok));

    // a fired flag stops the runaway loop instead of spinning forever
    flag.store(true, Ordering::SeqCst);
    assert_eq!(session.feed_line(&mut vm, "while true {}"), Some(RunOutcome::RuntimeErr));
    assert!(!flag.load(Ordering::SeqCst), "the flag is consumed");

    // the stack was reset; globals and interned strings survived
    assert_eq!(session.feed_line(&mut vm, "echo x"), Some(RunOutcome::Ok));
    drop(vm);
    assert_eq!(echo.output(), "11\n");
}

#[test]
fn repl_session_keeps_definitions_between_entries() {
    let mut echo = CollectStringEcho::new();
    let mut vm = Vm::new(&mut echo);
    let mut session = ReplSession::new(&mut vm);

    assert_eq!(session.feed_line(&mut vm, "var x = 21"), Some(RunOutcome::Ok));
    assert_eq!(session.feed_line(&mut vm, "echo x * 2"), Some(RunOutcome::Ok));
    drop(vm);
    assert_eq!(echo.output(), "42\n");
}

#[test]
fn repl_session_buffers_until_delimiters_close() {
    let mut echo = CollectStringEcho::new();
    let mut vm = Vm::new(&mut echo);
    let mut session = ReplSession::new(&mut vm);

    assert_eq!(session.feed_line(&mut vm, "def f() {"), None);
    assert_eq!(session.prompt(), "| ");
    assert_eq!(session.feed_line(&mut vm, "return 7 }"), Some(RunOutcome::Ok));
    assert_eq!(session.prompt(), "> ");
    assert_eq!(session.feed_line(&mut vm, "echo f()"), Some(RunOutcome::Ok));
    drop(vm);
    assert_eq!(echo.output(), "7\n");
}

#[test]
fn repl_echo_quotes_strings() {
    let mut echo = CollectStringEcho::new();
    let mut vm = Vm::new(&mut echo);
    let mut session = ReplSession::new(&mut vm);

    session.feed_line(&mut vm, "echo \"hi\"");
    session.feed_line(&mut vm, "echo 5");
    drop(vm);
    assert_eq!(echo.output(), "'hi'\n5\n");
}

#[test]
fn collection_pressure_does_not_change_results() {
    let mut echo = CollectStringEcho::new();
    let mut vm = Vm::new(&mut echo);
    // a tiny budget forces collections at nearly every allocation
    vm.heap.set_next_gc(1024);
    let outcome = vm.run_source(
        "var words = []\n\
         iter var i = 0; i < 60; i++ { words.append(\"w\" + i) }\n\
         var joined = \",\".join(words)\n\
         echo words.length()\n\
         echo joined.split(\",\").length()\n\
         echo words[0] + \":\" + words[59]",
        "<gc-stress>",
    );
    let stats = vm.heap.stats();
    drop(vm);
    assert_eq!(outcome, RunOutcome::Ok);
    assert_eq!(echo.output(), "60\n60\nw0:w59\n");
    assert!(stats.collections > 0, "expected at least one collection");
}

#[test]
fn closures_survive_collection() {
    let mut echo = CollectStringEcho::new();
    let mut vm = Vm::new(&mut echo);
    vm.heap.set_next_gc(1024);
    let outcome = vm.run_source(
        "def make(start) { def next() { start = start + 1\n return start } return next }\n\
         var c = make(100)\n\
         iter var i = 0; i < 40; i++ { var waste = \"junk\" + i\n c() }\n\
         echo c()",
        "<gc-closures>",
    );
    drop(vm);
    assert_eq!(outcome, RunOutcome::Ok);
    assert_eq!(echo.output(), "141\n");
}
