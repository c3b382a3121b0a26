use std::{
    error::Error,
    path::{Path, PathBuf},
};

use crate::{
    assemble::BuildOptions,
    cli::command_handlers::{do_build, do_deps, do_scan, ScannedFile},
    graph::MissingDescriptor,
    model::build::BuildArtifact,
    plugins::PluginRegistry,
    resolver::DependencySet,
};

mod builder;

pub use builder::PacklinkBuilder;

pub struct Packlink {
    root: PathBuf,
    options: BuildOptions,
    missing_descriptor: MissingDescriptor,
    plugins: PluginRegistry,
}

impl Packlink {
    pub fn builder() -> PacklinkBuilder {
        PacklinkBuilder::default()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Resolves, scans and links the package in `package_dir` together with
    /// its dependencies
    pub fn build(&self, package_dir: impl AsRef<Path>) -> Result<BuildArtifact, Box<dyn Error>> {
        do_build(
            &self.root,
            package_dir.as_ref(),
            &self.options,
            self.missing_descriptor,
            &self.plugins,
        )
    }

    /// Dependency set of the package in `package_dir`, the package itself included
    pub fn deps(&self, package_dir: impl AsRef<Path>) -> Result<DependencySet, Box<dyn Error>> {
        do_deps(&self.root, package_dir.as_ref(), self.missing_descriptor)
    }

    /// Scans standalone module files for imports and chrome usage
    pub fn scan(&self, files: &[PathBuf]) -> Result<Vec<ScannedFile>, Box<dyn Error>> {
        do_scan(files)
    }
}
