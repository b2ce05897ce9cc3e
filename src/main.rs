//! Demand Pager - Main Entry Point
//!
//! Usage: demand-pager [OPTIONS] <executable> <trace_file> [output_file]
//!
//! Loads a NOFF executable as process 0 and replays a trace of memory
//! references and process operations against the VM manager. Every read,
//! physical-address query, fork and shared allocation contributes one value
//! to the output (-1 on failure).

use std::process;

use clap::{App, Arg, ArgMatches};
use log::{LevelFilter, debug, error, info, warn};

use demand_pager::executable::HostFileSystem;
use demand_pager::io::{TraceOp, read_trace, write_results};
use demand_pager::logging;
use demand_pager::{MachineConfig, NUM_PHYS_PAGES, PolicyKind, VmError, VmManager, VmResult};

/// Command-line configuration
struct Config {
    executable: String,
    trace_file: String,
    output_file: Option<String>,
    machine: MachineConfig,
}

fn main() {
    let matches = App::new("demand-pager")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Demand-paged virtual memory manager for a simulated uniprocessor")
        .arg(
            Arg::with_name("policy")
                .short("p")
                .long("policy")
                .takes_value(true)
                .default_value("fifo")
                .help("Replacement policy: none, random, fifo, lru, clock (or 0-4)"),
        )
        .arg(
            Arg::with_name("frames")
                .short("n")
                .long("frames")
                .takes_value(true)
                .help("Number of physical frames"),
        )
        .arg(
            Arg::with_name("seed")
                .short("s")
                .long("seed")
                .takes_value(true)
                .help("Seed for the random policy"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log every fault and eviction"),
        )
        .arg(Arg::with_name("executable").required(true).index(1))
        .arg(Arg::with_name("trace_file").required(true).index(2))
        .arg(Arg::with_name("output_file").index(3))
        .get_matches();

    let level = if matches.is_present("verbose") {
        LevelFilter::Debug
    } else {
        logging::level_from_env()
    };
    logging::init(level);

    let config = match parse_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    // Run the VM manager and handle any errors
    if let Err(e) = run(&config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn parse_config(matches: &ArgMatches) -> VmResult<Config> {
    let policy: PolicyKind = matches.value_of("policy").unwrap_or("fifo").parse()?;
    let num_frames = match matches.value_of("frames") {
        Some(n) => n
            .parse()
            .map_err(|_| VmError::Parse(format!("Invalid frame count: {}", n)))?,
        None => NUM_PHYS_PAGES,
    };
    if num_frames == 0 {
        return Err(VmError::Parse("Frame count must be positive".to_string()));
    }
    let seed = match matches.value_of("seed") {
        Some(s) => s
            .parse()
            .map_err(|_| VmError::Parse(format!("Invalid seed: {}", s)))?,
        None => 0,
    };

    Ok(Config {
        executable: matches.value_of("executable").unwrap_or_default().to_string(),
        trace_file: matches.value_of("trace_file").unwrap_or_default().to_string(),
        output_file: matches.value_of("output_file").map(str::to_string),
        machine: MachineConfig {
            num_frames,
            policy,
            seed,
        },
    })
}

/// Main logic separated from main() for cleaner error handling
fn run(config: &Config) -> VmResult<()> {
    let ops = read_trace(&config.trace_file)?;
    let mut vm = VmManager::new(config.machine, HostFileSystem::default());

    info!(
        "{} frames, policy {}, {} trace operations",
        vm.frames().len(),
        vm.policy().kind(),
        ops.len()
    );

    let pid = vm.create_process(&config.executable)?;
    vm.switch_to(pid)?;
    if let Some(space) = vm.address_space(pid) {
        debug!("pid {} stack pointer {:#x}", pid, space.initial_stack_pointer());
    }

    let mut results = Vec::new();
    for op in &ops {
        let value = match step(&mut vm, op) {
            Ok(value) => value,
            Err(e) => {
                report(&mut vm, op, &e);
                i64::from(e.status())
            }
        };
        if op.produces_output() {
            results.push(value);
        }
    }

    match &config.output_file {
        Some(path) => write_results(path, &results)?,
        None => {
            let line: Vec<String> = results.iter().map(|r| r.to_string()).collect();
            println!("{}", line.join(" "));
        }
    }
    eprintln!("{}", vm.stats());
    Ok(())
}

/// Apply one trace operation; the value is what the output records for it
fn step(vm: &mut VmManager, op: &TraceOp) -> VmResult<i64> {
    match *op {
        TraceOp::Read(vaddr) => vm.read_byte(vaddr).map(i64::from),
        TraceOp::Write(vaddr, value) => vm.write_byte(vaddr, value).map(|_| 0),
        TraceOp::PhysAddr(vaddr) => Ok(i64::from(vm.physical_address(vaddr)?.to_output())),
        TraceOp::Fork => {
            let parent = vm.current_pid().ok_or(VmError::NoCurrentProcess)?;
            Ok(vm.fork(parent)? as i64)
        }
        TraceOp::Switch(pid) => vm.switch_to(pid).map(|_| 0),
        TraceOp::Shared(pages) => {
            let pid = vm.current_pid().ok_or(VmError::NoCurrentProcess)?;
            Ok(vm.allocate_shared(pid, pages)? as i64)
        }
        TraceOp::Exit(pid) => vm.exit_process(pid).map(|_| 0),
    }
}

/// A fatal error kills the running process; anything else is reported and skipped.
fn report(vm: &mut VmManager, op: &TraceOp, e: &VmError) {
    let Some(pid) = vm.current_pid() else {
        warn!("{:?}: {}", op, e);
        return;
    };
    if e.is_fatal() && !matches!(op, TraceOp::Fork | TraceOp::Shared(_)) {
        error!("pid {} terminated: {}", pid, e);
        if let Err(e) = vm.exit_process(pid) {
            warn!("exit of pid {}: {}", pid, e);
        }
    } else {
        warn!("pid {} {:?}: {}", pid, op, e);
    }
}
