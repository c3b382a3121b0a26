use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Resolves package dependencies and links their modules into a build manifest.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Project root, the directory holding the shared `packages` directory
    #[clap(short, long, default_value = ".")]
    pub root: PathBuf,
    /// Ignore directories under `packages` that have no package.json
    #[clap(long)]
    pub skip_missing_descriptors: bool,
}

#[derive(Debug, Parser)]
pub enum Command {
    ///Builds the manifest of a package and its dependencies
    Build {
        package_dir: PathBuf,
        /// Prepended to every resource namespace
        #[clap(short, long)]
        prefix: Option<String>,
        /// Fail on imports that resolve to no module
        #[clap(long)]
        strict: bool,
        /// Mount the tests of every dependency
        #[clap(long)]
        include_dep_tests: bool,
        /// Do not mount any test section
        #[clap(long)]
        no_tests: bool,
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
        /// Write the build here instead of stdout
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    ///Prints the dependency set of a package
    Deps { package_dir: PathBuf },
    ///Scans module files for imports and chrome usage
    Scan {
        #[clap(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Toml,
}
