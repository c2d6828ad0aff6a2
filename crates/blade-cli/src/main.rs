//! The `blade` executable: runs a script file, or starts the REPL when
//! no file is given.
//!
//! Exit codes: 0 success, 10 compile error, 11 runtime error,
//! 12 terminal abort.
//!
//! `SIGINT` handling follows the language contract: in the REPL a Ctrl+C
//! abandons the current input and evaluation and returns to the prompt
//! (globals and interned strings survive); a running script keeps the
//! default disposition, so Ctrl+C terminates it.

use std::io::{self, BufRead, Write as _};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use blade::{ReplSession, RunOutcome, StdEcho, Vm, DEFAULT_GC_START};

const EXIT_COMPILE: u8 = 10;
const EXIT_RUNTIME: u8 = 11;
const EXIT_TERMINAL: u8 = 12;

const VERSION: &str = env!("CARGO_PKG_VERSION");

struct Options {
    buffer_stdout: bool,
    print_bytecode: bool,
    trace_execution: bool,
    gc_start: usize,
    file: Option<PathBuf>,
    /// Everything after the script path, exposed through `Os.args()`.
    script_args: Vec<String>,
}

fn show_usage(program: &str, fail: bool) -> ExitCode {
    let out = format!(
        "Usage: {program} [-[h | v | b | d | j | g]] [filename]\n\
         \x20  -h    Show this help message.\n\
         \x20  -v    Show version string.\n\
         \x20  -b    Buffer terminal outputs.\n\
         \x20  -d    Show generated bytecode.\n\
         \x20  -j    Show stack objects during execution.\n\
         \x20  -g    Sets the minimum heap size in kilobytes before the GC\n\
         \x20        can start. [Default = {} ({}mb)]\n",
        DEFAULT_GC_START / 1024,
        DEFAULT_GC_START / (1024 * 1024),
    );
    eprint!("{out}");
    if fail {
        ExitCode::from(EXIT_TERMINAL)
    } else {
        ExitCode::SUCCESS
    }
}

fn parse_args() -> Result<Options, ExitCode> {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "blade".to_string());

    let mut options = Options {
        buffer_stdout: false,
        print_bytecode: false,
        trace_execution: false,
        gc_start: DEFAULT_GC_START,
        file: None,
        script_args: Vec::new(),
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" => return Err(show_usage(&program, false)),
            "-v" => {
                println!("Blade {VERSION} (running on BladeVM {VERSION})");
                return Err(ExitCode::SUCCESS);
            }
            "-b" => options.buffer_stdout = true,
            "-d" => options.print_bytecode = true,
            "-j" => options.trace_execution = true,
            "-g" => {
                let Some(kilobytes) =
                    args.next().and_then(|value| value.parse::<usize>().ok())
                else {
                    return Err(show_usage(&program, true));
                };
                if kilobytes > 0 {
                    options.gc_start = kilobytes * 1024;
                }
            }
            flag if flag.starts_with('-') => return Err(show_usage(&program, true)),
            file => {
                options.file = Some(PathBuf::from(file));
                options.script_args = args.collect();
                break;
            }
        }
    }
    Ok(options)
}

fn repl(vm: &mut Vm<'_>) -> ExitCode {
    println!("Blade {VERSION} (running on BladeVM {VERSION}), REPL/Interactive mode = ON");
    println!("Type \"exit()\" to quit or press Ctrl+D");

    // Ctrl+C sets the flag; the VM's dispatch loop polls it to abandon a
    // running evaluation, and the input loop below consumes it to drop
    // buffered input. Either way control comes back to the prompt.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        if ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).is_err() {
            eprintln!("failed to register interrupts with kernel");
        }
    }
    vm.set_interrupt_flag(Arc::clone(&interrupted));

    let mut session = ReplSession::new(vm);
    let stdin = io::stdin();
    loop {
        print!("{}", session.prompt());
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break, // EOF ends the session
            Ok(_) => {}
        }
        if interrupted.swap(false, Ordering::SeqCst) {
            println!("<KeyboardInterrupt>");
            session.reset_input();
            continue;
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line == "exit()" {
            break;
        }

        let _ = session.feed_line(vm, line);
    }
    vm.shutdown();
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    let options = match parse_args() {
        Ok(options) => options,
        Err(code) => return code,
    };

    let mut echo = if options.buffer_stdout { StdEcho::buffered() } else { StdEcho::new() };
    let mut vm = Vm::new(&mut echo);
    vm.print_bytecode = options.print_bytecode;
    vm.trace_execution = options.trace_execution;
    vm.heap.set_next_gc(options.gc_start);
    vm.set_std_args(options.script_args);

    match options.file {
        Some(file) => {
            // scripts keep the default SIGINT disposition: Ctrl+C terminates
            let outcome = vm.run_file(&file);
            vm.shutdown();
            match outcome {
                RunOutcome::Ok => ExitCode::SUCCESS,
                RunOutcome::CompileErr => ExitCode::from(EXIT_COMPILE),
                RunOutcome::RuntimeErr => ExitCode::from(EXIT_RUNTIME),
            }
        }
        None => repl(&mut vm),
    }
}
