//! The `dwarfcheck` binary.
//!
//! Parses the flags into a [`CheckConfig`], assembles the diagnostic
//! criteria once, and runs the structural check over every input file in
//! turn. The exit status is 1 as soon as any diagnostic was printed.

use std::process::ExitCode;

use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::EnvFilter;

use dwarfcheck::{check_file, CheckConfig, Diagnostics};
use dwarfcheck_common::ByteView;

fn build_command() -> Command {
    Command::new("dwarfcheck")
        .about("Pedantic checking of DWARF stored in ELF files")
        .arg(
            Arg::new("strict")
                .long("strict")
                .action(ArgAction::SetTrue)
                .help("Be extremely strict, flag level 2 features"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose")
                .help("Do not print anything if successful"),
        )
        .arg(
            Arg::new("ignore-missing")
                .short('i')
                .long("ignore-missing")
                .action(ArgAction::SetTrue)
                .help("Don't complain if files have no DWARF at all"),
        )
        .arg(
            Arg::new("gnu")
                .long("gnu")
                .action(ArgAction::SetTrue)
                .help(
                    "Binary has been created with GNU toolchain and is therefore known \
                     to be broken in certain ways",
                ),
        )
        .arg(
            Arg::new("tolerant")
                .long("tolerant")
                .action(ArgAction::SetTrue)
                .help("Don't output certain common error messages"),
        )
        .arg(
            Arg::new("ref")
                .long("ref")
                .action(ArgAction::SetTrue)
                .help(
                    "When validating .debug_loc and .debug_ranges, display information \
                     about the DIE referring to the entry in consideration",
                ),
        )
        .arg(
            Arg::new("nohl")
                .long("nohl")
                .action(ArgAction::SetTrue)
                .help("Don't run high-level tests"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Be verbose"),
        )
        .arg(
            Arg::new("files")
                .value_name("FILE")
                .num_args(0..)
                .help("Input ELF files"),
        )
}

fn config_from_matches(matches: &ArgMatches) -> CheckConfig {
    CheckConfig {
        quiet: matches.get_flag("quiet"),
        verbose: matches.get_flag("verbose"),
        ignore_missing: matches.get_flag("ignore-missing"),
        strict: matches.get_flag("strict"),
        gnu: matches.get_flag("gnu"),
        tolerant: matches.get_flag("tolerant"),
        show_refs: matches.get_flag("ref"),
        high_level: !matches.get_flag("nohl"),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut command = build_command();
    let matches = command.clone().get_matches();

    let files: Vec<String> = matches
        .get_many::<String>("files")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    if files.is_empty() {
        eprintln!("Missing file name.");
        let _ = command.print_help();
        return ExitCode::from(1);
    }

    let config = config_from_matches(&matches);
    let diag = Diagnostics::from_config(&config);

    if config.verbose {
        println!("warning criteria: {}", diag.warning_criteria());
        println!("error criteria:   {}", diag.error_criteria());
    }

    let only_one = files.len() == 1;
    for fname in &files {
        let view = match ByteView::open(fname) {
            Ok(view) => view,
            Err(err) => {
                eprintln!("cannot open input file: {err}");
                continue;
            }
        };

        if !only_one {
            println!("\n{fname}:");
        }

        let prev_error_count = diag.error_count();
        check_file(&view, &diag, &config, None);

        if prev_error_count == diag.error_count() && !config.quiet {
            println!("No errors");
        }
    }

    if diag.error_count() != 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
