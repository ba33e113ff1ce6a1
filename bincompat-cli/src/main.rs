mod app;

use anyhow::Context;
use clap::Parser;

use bincompat::driver::{run, CheckOptions};
use bincompat::fileset;
use bincompat::report::BaselineStatus;

use crate::app::Cli;

fn main() {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    // Expand @FILE response arguments before clap sees them.
    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let args = match fileset::expand_response_args(raw_args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    let cli = match Cli::try_parse_from(std::iter::once("bincompat".to_string()).chain(args)) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    // Show info+ on stderr; --verbose enables debug; RUST_LOG overrides.
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_module("bincompat", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    match try_run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}

fn try_run(cli: Cli) -> anyhow::Result<i32> {
    let root = std::env::current_dir().context("cannot determine working directory")?;

    let (excludes, includes): (Vec<String>, Vec<String>) =
        cli.paths.into_iter().partition(|p| p.starts_with('!'));

    let mut options = CheckOptions::new(root);
    options.includes = includes;
    options.excludes = excludes
        .into_iter()
        .map(|p| p.trim_start_matches('!').to_string())
        .collect();
    options.patterns = fileset::split_patterns(&cli.patterns);
    options.report_path = cli.out;
    options.list_assemblies = cli.list_assemblies;
    options.ivt_report = cli.ivt;
    options.ignore_version_mismatch = cli.ignore_version_mismatch;
    options.embedded_interop_types = cli.embedded_interop_types;
    options.intptr_ctors = cli.intptr_ctors;
    options.resolve_dirs = cli.resolve_dir;

    let status = run(&options).context("compatibility check failed")?;
    Ok(match status {
        BaselineStatus::Matched => 0,
        BaselineStatus::Created => {
            log::info!("baseline seeded at {}", options.report_path.display());
            0
        }
        BaselineStatus::Diverged => 1,
    })
}
