use std::fmt::Display;

use log::trace;
use thiserror::Error;

use crate::{graph::PackageGraph, model::package::PackageName};

/// Why a package was asked for, reported when it cannot be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequiredBy {
    Target,
    Package(PackageName),
    DefaultLoader,
}

impl Display for RequiredBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequiredBy::Target => f.write_str("specified as target"),
            RequiredBy::Package(parent) => write!(f, "required by '{parent}'"),
            RequiredBy::DefaultLoader => f.write_str("required as default loader"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Package not found: {missing_package} ({reason})")]
pub struct PackageNotFound {
    pub missing_package: PackageName,
    pub reason: RequiredBy,
}

/// Transitive closure of one or more targets, each package listed once in
/// the order it was first reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    names: Vec<PackageName>,
}

impl DependencySet {
    pub fn iter(&self) -> impl Iterator<Item = &PackageName> {
        self.names.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.as_str() == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Appends the closure of `root`, skipping packages already present.
    pub fn extend_closure(
        &mut self,
        graph: &PackageGraph,
        root: &PackageName,
        reason: RequiredBy,
    ) -> Result<Vec<PackageName>, PackageNotFound> {
        let closure = closure(graph, vec![(root.clone(), reason)])?;
        let added: Vec<PackageName> = closure
            .names
            .into_iter()
            .filter(|name| !self.contains(name.as_str()))
            .collect();
        self.names.extend(added.iter().cloned());
        Ok(added)
    }
}

impl<'a> IntoIterator for &'a DependencySet {
    type Item = &'a PackageName;
    type IntoIter = std::slice::Iter<'a, PackageName>;

    fn into_iter(self) -> Self::IntoIter {
        self.names.iter()
    }
}

/// Computes the dependency closure of `targets`.
///
/// The traversal is a depth-first walk over an explicit stack: the last
/// target is expanded first, and a package's dependencies are visited in
/// reverse declaration order. Cycles terminate because every name is
/// expanded at most once.
pub fn resolve(
    graph: &PackageGraph,
    targets: &[PackageName],
) -> Result<DependencySet, PackageNotFound> {
    closure(
        graph,
        targets
            .iter()
            .map(|target| (target.clone(), RequiredBy::Target))
            .collect(),
    )
}

fn closure(
    graph: &PackageGraph,
    mut deps_left: Vec<(PackageName, RequiredBy)>,
) -> Result<DependencySet, PackageNotFound> {
    let mut visited = DependencySet::default();

    while let Some((name, required_by)) = deps_left.pop() {
        if visited.contains(name.as_str()) {
            continue;
        }
        let config = graph.get(name.as_str()).ok_or_else(|| PackageNotFound {
            missing_package: name.clone(),
            reason: required_by,
        })?;
        trace!("Adding {} to the dependency set", name);
        deps_left.extend(
            config
                .dependencies
                .iter()
                .map(|dep| (dep.clone(), RequiredBy::Package(name.clone()))),
        );
        visited.names.push(name);
    }

    Ok(visited)
}
