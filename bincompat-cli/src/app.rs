use std::path::PathBuf;

use clap::Parser;

/// bincompat - verify binary compatibility across a set of .NET assemblies
#[derive(Debug, Parser)]
#[command(name = "bincompat", version, about, long_about = None)]
pub struct Cli {
    /// Files, directories, or globs to examine; `;` separates pattern lists,
    /// `**` recurses, and a leading `!` excludes. Defaults to the current
    /// directory.
    #[arg(value_name = "PATTERN")]
    pub paths: Vec<String>,

    /// Baseline/report file path.
    #[arg(long, value_name = "PATH", default_value = "BinaryCompatReport.txt")]
    pub out: PathBuf,

    /// File patterns applied when scanning directories (`;`-separated).
    #[arg(
        long,
        value_name = "GLOBS",
        default_value = "*.dll;*.exe;*.dll.config;*.exe.config"
    )]
    pub patterns: String,

    /// Append the examined-assemblies list to the report.
    #[arg(short = 'l', long)]
    pub list_assemblies: bool,

    /// Write the InternalsVisibleTo usage reports next to the baseline.
    #[arg(long)]
    pub ivt: bool,

    /// Suppress version-mismatch diagnostics.
    #[arg(long)]
    pub ignore_version_mismatch: bool,

    /// Report embedded interop types.
    #[arg(long)]
    pub embedded_interop_types: bool,

    /// Report platform-pointer constructor usages.
    #[arg(long)]
    pub intptr_ctors: bool,

    /// Additional directory the resolver may search (repeatable, in order).
    #[arg(long, value_name = "DIR")]
    pub resolve_dir: Vec<PathBuf>,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long)]
    pub verbose: bool,
}
