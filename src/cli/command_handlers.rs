use log::{debug, info};

use crate::{
    assemble::{assemble, BuildOptions},
    cli::args::OutputFormat,
    graph::{MissingDescriptor, PackageGraph},
    model::{
        build::BuildArtifact,
        package::{PackageConfig, PackageName},
    },
    plugins::PluginRegistry,
    resolver::{self, DependencySet},
    scanner::{ModuleScan, Scanner},
};
use std::{
    error::Error,
    path::{Path, PathBuf},
};

/// One standalone file and what the scanner found in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub scan: ModuleScan,
}

/// Handler to build command
/// 1 - Loads the target package and every package visible from it
/// 2 - Resolves the dependency set and runs package plugins
/// 3 - Assembles and links the build
pub fn do_build(
    root: &Path,
    package_dir: &Path,
    options: &BuildOptions,
    missing_descriptor: MissingDescriptor,
    plugins: &PluginRegistry,
) -> Result<BuildArtifact, Box<dyn Error>> {
    let (mut graph, target) = load_graph(root, package_dir, missing_descriptor)?;

    let deps = resolver::resolve(&graph, &[target.clone()])?;
    info!("Resolved {} packages for {}", deps.len(), target);

    plugins.call_plugins(&graph, &deps)?;

    let build = assemble(&mut graph, &target, &deps, options)?;
    Ok(build)
}

/// Handler to deps command
pub fn do_deps(
    root: &Path,
    package_dir: &Path,
    missing_descriptor: MissingDescriptor,
) -> Result<DependencySet, Box<dyn Error>> {
    let (graph, target) = load_graph(root, package_dir, missing_descriptor)?;
    let deps = resolver::resolve(&graph, &[target])?;
    Ok(deps)
}

/// Handler to scan command
pub fn do_scan(files: &[PathBuf]) -> Result<Vec<ScannedFile>, Box<dyn Error>> {
    let scanner = Scanner::new();
    let mut scanned = Vec::with_capacity(files.len());
    for path in files {
        let source = std::fs::read_to_string(path)
            .map_err(|err| format!("Could not read {}: {}", path.display(), err))?;
        let scan = scanner.scan_module(path, &source);
        debug!("{}: {} requires", path.display(), scan.requires.len());
        scanned.push(ScannedFile {
            path: path.clone(),
            scan,
        });
    }
    Ok(scanned)
}

/// Serializes `build` and writes it to `output`, or to stdout.
pub fn write_build(
    build: &BuildArtifact,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let rendered = render_build(build, format)?;
    match output {
        Some(output) => {
            std::fs::write(output, rendered)?;
            info!("Wrote build to {}", output.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

pub fn render_build(build: &BuildArtifact, format: OutputFormat) -> Result<String, Box<dyn Error>> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(build)?,
        OutputFormat::Toml => toml::to_string_pretty(build)?,
    };
    Ok(rendered)
}

fn load_graph(
    root: &Path,
    package_dir: &Path,
    missing_descriptor: MissingDescriptor,
) -> Result<(PackageGraph, PackageName), Box<dyn Error>> {
    let target = PackageConfig::from_dir(&root.join(package_dir))?;
    let name = target.name.clone();
    debug!("Loaded target {} from {}", name, target.root_dir.display());
    let graph = PackageGraph::build(root, target, missing_descriptor)?;
    Ok((graph, name))
}
