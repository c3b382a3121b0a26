use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use log::{debug, trace};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    model::{
        package::{PackageConfig, PackageName},
        ParseError,
    },
    resolver::DependencySet,
};

/// Conventional name of a directory holding a collection of packages.
pub const PACKAGES_DIR: &str = "packages";

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Package `{name}` is defined twice: in {} and in {}", path.display(), existing.display())]
    DuplicatePackage {
        name: PackageName,
        path: PathBuf,
        existing: PathBuf,
    },
    #[error("Packages directory {} does not exist", path.display())]
    MissingPackagesDir { path: PathBuf },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// What to do with a directory inside a packages collection that has no
/// descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingDescriptor {
    /// Every directory in a packages collection must be a package.
    #[default]
    Fail,
    /// Plain directories are ignored.
    Skip,
}

/// Every package discovered under a root, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct PackageGraph {
    packages: BTreeMap<PackageName, PackageConfig>,
}

impl PackageGraph {
    /// Discovers the packages visible from `target`: those under the target's
    /// own `packages` directories, under `<root_dir>/packages`, and recursively
    /// under the `packages` directories of every package found.
    pub fn build(
        root_dir: &Path,
        target: PackageConfig,
        missing_descriptor: MissingDescriptor,
    ) -> Result<PackageGraph, GraphError> {
        Self::scan(root_dir, Some(target), missing_descriptor)
    }

    /// Discovers every package under `root_dir` without a target package.
    pub fn discover(
        root_dir: &Path,
        missing_descriptor: MissingDescriptor,
    ) -> Result<PackageGraph, GraphError> {
        Self::scan(root_dir, None, missing_descriptor)
    }

    fn scan(
        root_dir: &Path,
        target: Option<PackageConfig>,
        missing_descriptor: MissingDescriptor,
    ) -> Result<PackageGraph, GraphError> {
        let mut dirs_to_scan: Vec<PathBuf> = Vec::new();
        let mut graph = PackageGraph::default();

        if let Some(target) = target {
            dirs_to_scan.extend(target.resolve_dirs(&target.packages));
            graph.insert(target);
        }

        let packages_dir = root_dir.join(PACKAGES_DIR);
        if packages_dir.is_dir() {
            dirs_to_scan.push(packages_dir);
        }

        while let Some(packages_dir) = dirs_to_scan.pop() {
            debug!("Scanning packages directory {}", packages_dir.display());
            for path in package_paths(&packages_dir)? {
                let config = match PackageConfig::from_dir(&path) {
                    Ok(config) => config,
                    Err(ParseError::MalformedPackage { .. })
                        if missing_descriptor == MissingDescriptor::Skip =>
                    {
                        trace!("Skipping {}, it has no descriptor", path.display());
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };

                match graph.packages.get(&config.name) {
                    Some(existing) => {
                        if !is_same_dir(&existing.root_dir, &config.root_dir) {
                            return Err(GraphError::DuplicatePackage {
                                name: config.name,
                                path,
                                existing: existing.root_dir.clone(),
                            });
                        }
                    }
                    None => {
                        dirs_to_scan.extend(config.resolve_dirs(&config.packages));
                        graph.insert(config);
                    }
                }
            }
        }

        debug!("Found {} packages", graph.len());
        Ok(graph)
    }

    pub fn insert(&mut self, config: PackageConfig) {
        self.packages.insert(config.name.clone(), config);
    }

    pub fn get(&self, name: &str) -> Option<&PackageConfig> {
        self.packages.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PackageConfig> {
        self.packages.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageConfig> {
        self.packages.values()
    }

    /// Descriptive metadata for every package of `deps`.
    pub fn metadata(&self, deps: &DependencySet) -> BTreeMap<PackageName, Map<String, Value>> {
        deps.iter()
            .filter_map(|name| self.get(name.as_str()))
            .map(|config| (config.name.clone(), config.metadata()))
            .collect()
    }

    /// Packages that ship a top-level `<module>.js` in one of their lib
    /// directories.
    pub fn packages_with_module(&self, module: &str) -> Vec<PackageName> {
        self.iter()
            .filter(|config| config.has_lib_module(module))
            .map(|config| config.name.clone())
            .collect()
    }
}

/// Sub-directories of a packages collection, sorted, dot-directories excluded.
fn package_paths(packages_dir: &Path) -> Result<Vec<PathBuf>, GraphError> {
    if !packages_dir.is_dir() {
        return Err(GraphError::MissingPackagesDir {
            path: packages_dir.to_path_buf(),
        });
    }
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(packages_dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('.'));
        if path.is_dir() && !hidden {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn is_same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
