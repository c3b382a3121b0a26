use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{
    graph::PackageGraph,
    linker::{self, LinkError, UnresolvedImports},
    model::{
        build::{BuildArtifact, Section},
        namespace::{validate_prefix, BadResourceName, ResourceNamespace},
        package::{PackageConfig, PackageName},
    },
    resolver::{DependencySet, PackageNotFound, RequiredBy},
    scanner::{ChromeDiagnostic, ScanError, Scanner},
};

/// Package providing the module loader when no dependency declares one.
pub const DEFAULT_LOADER: &str = "api-utils";

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    BadResourceName(#[from] BadResourceName),
    #[error("Resource `{name}` is already defined")]
    ResourceCollision { name: ResourceNamespace },
    #[error("Unrequested chrome access in the {section} of package {package}:\n{}", render_diagnostics(.diagnostics))]
    ChromeViolation {
        package: PackageName,
        section: Section,
        diagnostics: Vec<ChromeDiagnostic>,
    },
    #[error("Target package `{0}` is not part of the package graph")]
    UnknownTarget(PackageName),
    #[error(transparent)]
    PackageNotFound(#[from] PackageNotFound),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

fn render_diagnostics(diagnostics: &[ChromeDiagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Prepended to every resource namespace, may be empty.
    pub prefix: String,
    pub include_tests: bool,
    /// Also mount the tests of every dependency, not only the target's.
    pub include_dep_tests: bool,
    pub default_loader: PackageName,
    pub unresolved_imports: UnresolvedImports,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            prefix: String::new(),
            include_tests: true,
            include_dep_tests: false,
            default_loader: PackageName::from(DEFAULT_LOADER),
            unresolved_imports: UnresolvedImports::default(),
        }
    }
}

/// Mounts every section of `target` and its dependencies under a namespace,
/// scans the code sections and links the resulting manifest.
///
/// The target's icons are moved out of its config into the build.
pub fn assemble(
    graph: &mut PackageGraph,
    target: &PackageName,
    deps: &DependencySet,
    options: &BuildOptions,
) -> Result<BuildArtifact, BuildError> {
    validate_prefix(&options.prefix)?;
    let mut deps = deps.clone();

    let mut build = {
        let graph: &PackageGraph = graph;
        let target_cfg = graph
            .get(target.as_str())
            .ok_or_else(|| BuildError::UnknownTarget(target.clone()))?;
        let mut assembly = Assembly {
            graph,
            options,
            scanner: Scanner::new(),
            build: BuildArtifact::default(),
        };

        if options.include_tests && !options.include_dep_tests {
            assembly.add_section(target_cfg, Section::Tests)?;
        }
        for dep in deps.iter() {
            assembly.add_dep(dep)?;
        }

        if assembly.build.loader.is_none() {
            info!(
                "No package declares a loader, adding {}",
                options.default_loader
            );
            let added =
                deps.extend_closure(graph, &options.default_loader, RequiredBy::DefaultLoader)?;
            for dep in &added {
                assembly.add_dep(dep)?;
            }
            if assembly.build.loader.is_none() {
                warn!(
                    "Default loader package {} does not declare a loader",
                    options.default_loader
                );
            }
        }
        assembly.build
    };

    if let Some(target_cfg) = graph.get_mut(target.as_str()) {
        move_icons(target_cfg, &mut build);
    }
    build.metadata = graph.metadata(&deps);

    let mut unresolved = linker::link(&mut build.manifest, &build.root_paths)?;
    for import in &mut unresolved {
        import.candidates = graph
            .packages_with_module(&import.import)
            .into_iter()
            .filter(|package| !deps.contains(package.as_str()))
            .collect();
    }
    linker::check_unresolved(unresolved, options.unresolved_imports)?;

    info!(
        "Assembled {} with {} resources and {} modules",
        target,
        build.resources.len(),
        build.manifest.len()
    );
    Ok(build)
}

fn move_icons(target_cfg: &mut PackageConfig, build: &mut BuildArtifact) {
    if let Some(icon) = target_cfg.icon.take() {
        build.icon = Some(target_cfg.resolve_dir(&icon));
    }
    if let Some(icon64) = target_cfg.icon64.take() {
        build.icon64 = Some(target_cfg.resolve_dir(&icon64));
    }
}

struct Assembly<'a> {
    graph: &'a PackageGraph,
    options: &'a BuildOptions,
    scanner: Scanner,
    build: BuildArtifact,
}

impl Assembly<'_> {
    fn add_dep(&mut self, dep: &PackageName) -> Result<(), BuildError> {
        let cfg = self
            .graph
            .get(dep.as_str())
            .ok_or_else(|| PackageNotFound {
                missing_package: dep.clone(),
                reason: RequiredBy::Target,
            })?;
        self.add_section(cfg, Section::Lib)?;
        self.add_section(cfg, Section::Data)?;
        if self.options.include_tests && self.options.include_dep_tests {
            self.add_section(cfg, Section::Tests)?;
        }
        if let (Some(loader), None) = (&cfg.loader, &self.build.loader) {
            let loader = format!("resource://{}{}-{}", self.options.prefix, cfg.name, loader);
            debug!("Using loader {}", loader);
            self.build.loader = Some(loader);
        }
        Ok(())
    }

    fn add_section(&mut self, cfg: &PackageConfig, section: Section) -> Result<(), BuildError> {
        let dirnames = match section {
            Section::Lib => &cfg.lib,
            Section::Tests => &cfg.tests,
            Section::Data => &cfg.data,
        };
        for dirname in dirnames {
            let dir = cfg.resolve_dir(dirname);
            let base = dir
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| dirname.clone());
            let name =
                ResourceNamespace::compose(&self.options.prefix, cfg.name.as_str(), &base)?;
            if self.build.resources.contains_key(&name) {
                return Err(BuildError::ResourceCollision { name });
            }
            let url = name.url();
            self.build
                .resource_packages
                .insert(name.clone(), cfg.name.clone());
            self.build.resources.insert(name, dir.clone());

            if section.is_code() {
                self.build.root_paths.insert(0, url.clone());
                let scan = self
                    .scanner
                    .scan_section(&cfg.name, section, &dir, &url)?;
                if !scan.diagnostics.is_empty() {
                    for diagnostic in &scan.diagnostics {
                        error!("{}", diagnostic);
                    }
                    return Err(BuildError::ChromeViolation {
                        package: cfg.name.clone(),
                        section,
                        diagnostics: scan.diagnostics,
                    });
                }
                for record in scan.records {
                    self.build
                        .manifest
                        .insert(record.resource_url.clone(), record);
                }
            } else {
                self.build.package_data.insert(cfg.name.clone(), url);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, path::PathBuf};

    use super::*;

    use crate::{graph::MissingDescriptor, resolver::resolve, testing::Fixture};
    use pretty_assertions::assert_eq;

    fn options() -> BuildOptions {
        BuildOptions {
            prefix: "guid-".to_string(),
            ..Default::default()
        }
    }

    fn assemble_fixture(
        fixture: &Fixture,
        target: &str,
        options: &BuildOptions,
    ) -> Result<(PackageGraph, BuildArtifact), BuildError> {
        let mut graph = PackageGraph::discover(fixture.root(), MissingDescriptor::Fail).unwrap();
        let target = PackageName::from(target);
        let deps = resolve(&graph, &[target.clone()]).unwrap();
        let build = assemble(&mut graph, &target, &deps, options)?;
        Ok((graph, build))
    }

    /// `app -> lib1 -> lib2`, plus a loader package.
    fn chain(fixture: &Fixture) {
        fixture.package("packages/app", r#"{"dependencies": ["lib1"]}"#);
        fixture.file("packages/app/lib/main.js", "var lib1 = require('lib1');");
        fixture.package("packages/lib1", r#"{"dependencies": "lib2"}"#);
        fixture.file("packages/lib1/lib/lib1.js", "exports.x = require('lib2');");
        fixture.package("packages/lib2", "{}");
        fixture.file("packages/lib2/lib/lib2.js", "exports.y = 1;");
        fixture.package("packages/api-utils", r#"{"loader": "lib/cuddlefish.js"}"#);
        fixture.file(
            "packages/api-utils/lib/cuddlefish.js",
            "let {Cc,Ci} = require('chrome');",
        );
    }

    fn keys<K: ToString, V>(map: &std::collections::BTreeMap<K, V>) -> BTreeSet<String> {
        map.keys().map(|k| k.to_string()).collect()
    }

    #[test]
    fn assembles_a_dependency_chain() {
        let fixture = Fixture::new();
        chain(&fixture);

        let (_, build) = assemble_fixture(&fixture, "app", &options()).unwrap();
        assert_eq!(
            keys(&build.resources),
            BTreeSet::from([
                "guid-api-utils-lib".to_string(),
                "guid-app-lib".to_string(),
                "guid-lib1-lib".to_string(),
                "guid-lib2-lib".to_string(),
            ])
        );
        assert_eq!(
            build.resources[&ResourceNamespace::new("guid-lib1-lib").unwrap()],
            fixture.path("packages/lib1/lib")
        );
        assert_eq!(
            build.resource_packages[&ResourceNamespace::new("guid-lib2-lib").unwrap()],
            PackageName::from("lib2")
        );
        assert_eq!(
            build.loader.as_deref(),
            Some("resource://guid-api-utils-lib/cuddlefish.js")
        );
        assert_eq!(
            build.root_paths,
            vec![
                "resource://guid-api-utils-lib/".to_string(),
                "resource://guid-lib2-lib/".to_string(),
                "resource://guid-lib1-lib/".to_string(),
                "resource://guid-app-lib/".to_string(),
            ]
        );

        let main = &build.manifest["resource://guid-app-lib/main.js"];
        assert_eq!(
            main.requires["lib1"].url.as_deref(),
            Some("resource://guid-lib1-lib/lib1.js")
        );
        let lib1 = &build.manifest["resource://guid-lib1-lib/lib1.js"];
        assert_eq!(
            lib1.requires["lib2"].url.as_deref(),
            Some("resource://guid-lib2-lib/lib2.js")
        );
        assert_eq!(
            keys(&build.metadata),
            BTreeSet::from([
                "api-utils".to_string(),
                "app".to_string(),
                "lib1".to_string(),
                "lib2".to_string(),
            ])
        );
    }

    #[test]
    fn repeated_builds_are_identical() {
        let fixture = Fixture::new();
        chain(&fixture);
        let (_, first) = assemble_fixture(&fixture, "app", &options()).unwrap();
        let (_, second) = assemble_fixture(&fixture, "app", &options()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn declared_loader_wins_over_default() {
        let fixture = Fixture::new();
        fixture.package("packages/foo", r#"{"loader": "lib/foo-loader.js"}"#);
        fixture.file("packages/foo/lib/foo-loader.js", "");

        let (_, build) = assemble_fixture(&fixture, "foo", &options()).unwrap();
        assert_eq!(
            build.loader.as_deref(),
            Some("resource://guid-foo-lib/foo-loader.js")
        );
        assert!(!build.metadata.contains_key("api-utils"));
    }

    #[test]
    fn missing_default_loader_fails() {
        let fixture = Fixture::new();
        fixture.package("packages/app", "{}");
        let err = assemble_fixture(&fixture, "app", &options()).unwrap_err();
        assert!(
            matches!(err, BuildError::PackageNotFound(PackageNotFound {
                reason: RequiredBy::DefaultLoader,
                ..
            })),
            "{err:?}"
        );
    }

    #[test]
    fn invalid_prefix_is_rejected() {
        let fixture = Fixture::new();
        chain(&fixture);
        let options = BuildOptions {
            prefix: "GUID".to_string(),
            ..Default::default()
        };
        let err = assemble_fixture(&fixture, "app", &options).unwrap_err();
        assert_eq!(err.to_string(), "invalid resource hostname: GUID");
    }

    #[test]
    fn invalid_package_name_is_rejected() {
        let fixture = Fixture::new();
        chain(&fixture);
        fixture.package("packages/Upper", r#"{"loader": "lib/l.js"}"#);
        fixture.dir("packages/Upper/lib");
        let err = assemble_fixture(&fixture, "Upper", &options()).unwrap_err();
        assert!(matches!(err, BuildError::BadResourceName(_)), "{err:?}");
    }

    #[test]
    fn colliding_namespaces_fail() {
        let fixture = Fixture::new();
        chain(&fixture);
        // `a` mounts `b-lib` as `guid-a-b-lib`, and so does package `a-b`.
        fixture.package("packages/a", r#"{"lib": "b-lib", "dependencies": ["a-b"]}"#);
        fixture.dir("packages/a/b-lib");
        fixture.package("packages/a-b", "{}");
        fixture.dir("packages/a-b/lib");

        let err = assemble_fixture(&fixture, "a", &options()).unwrap_err();
        match err {
            BuildError::ResourceCollision { name } => assert_eq!(name.as_str(), "guid-a-b-lib"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn chrome_violation_aborts_the_build() {
        let fixture = Fixture::new();
        chain(&fixture);
        fixture.file("packages/lib2/lib/bad.js", "let CID = Components.ID");
        fixture.file("packages/lib2/lib/worse.js", "Cu.import('x');");

        let err = assemble_fixture(&fixture, "app", &options()).unwrap_err();
        match err {
            BuildError::ChromeViolation {
                package,
                section,
                diagnostics,
            } => {
                assert_eq!(package.as_str(), "lib2");
                assert_eq!(section, Section::Lib);
                let files: Vec<PathBuf> = diagnostics.into_iter().map(|d| d.file).collect();
                assert_eq!(
                    files,
                    vec![
                        fixture.path("packages/lib2/lib/bad.js"),
                        fixture.path("packages/lib2/lib/worse.js"),
                    ]
                );
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn target_tests_and_data_are_mounted() {
        let fixture = Fixture::new();
        chain(&fixture);
        fixture.file("packages/app/tests/test-main.js", "require('not-there');");
        fixture.file("packages/app/data/panel.html", "");
        fixture.file("packages/lib1/tests/test-lib1.js", "");

        let (_, build) = assemble_fixture(&fixture, "app", &options()).unwrap();
        assert!(build
            .resources
            .contains_key(&ResourceNamespace::new("guid-app-tests").unwrap()));
        assert!(!build
            .resources
            .contains_key(&ResourceNamespace::new("guid-lib1-tests").unwrap()));
        assert_eq!(
            build.package_data.get("app").map(String::as_str),
            Some("resource://guid-app-data/")
        );
        assert_eq!(
            build.root_paths.last().map(String::as_str),
            Some("resource://guid-app-tests/")
        );
        let test = &build.manifest["resource://guid-app-tests/test-main.js"];
        assert_eq!(test.section, Section::Tests);
        assert_eq!(test.requires["not-there"].url, None);
    }

    #[test]
    fn dependency_tests_are_mounted_on_request() {
        let fixture = Fixture::new();
        chain(&fixture);
        fixture.dir("packages/app/tests");
        fixture.dir("packages/lib1/tests");

        let options = BuildOptions {
            include_dep_tests: true,
            ..options()
        };
        let (_, build) = assemble_fixture(&fixture, "app", &options).unwrap();
        assert!(build
            .resources
            .contains_key(&ResourceNamespace::new("guid-lib1-tests").unwrap()));
        assert!(build
            .resources
            .contains_key(&ResourceNamespace::new("guid-app-tests").unwrap()));

        let options = BuildOptions {
            include_tests: false,
            ..options
        };
        let (_, build) = assemble_fixture(&fixture, "app", &options).unwrap();
        assert!(!build
            .resources
            .contains_key(&ResourceNamespace::new("guid-app-tests").unwrap()));
    }

    #[test]
    fn unresolved_imports_follow_policy() {
        let fixture = Fixture::new();
        chain(&fixture);
        fixture.file("packages/app/lib/uses-timer.js", "require('timer');");
        fixture.package("packages/jetpack-core", "{}");
        fixture.file("packages/jetpack-core/lib/timer.js", "");

        assert!(assemble_fixture(&fixture, "app", &options()).is_ok());

        let strict = BuildOptions {
            unresolved_imports: UnresolvedImports::Deny,
            ..options()
        };
        let err = assemble_fixture(&fixture, "app", &strict).unwrap_err();
        match err {
            BuildError::Link(LinkError::Unresolved(unresolved)) => {
                assert_eq!(unresolved.len(), 1);
                assert_eq!(unresolved[0].import, "timer");
                assert_eq!(unresolved[0].candidates, vec![PackageName::from("jetpack-core")]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn icons_move_into_the_build() {
        let fixture = Fixture::new();
        chain(&fixture);
        fixture.file("packages/app/icon.png", "");
        fixture.file("packages/app/icon64.png", "");

        let (graph, build) = assemble_fixture(&fixture, "app", &options()).unwrap();
        assert_eq!(build.icon, Some(fixture.path("packages/app/icon.png")));
        assert_eq!(build.icon64, Some(fixture.path("packages/app/icon64.png")));
        let app = graph.get("app").unwrap();
        assert_eq!(app.icon, None);
        assert_eq!(app.icon64, None);
        assert!(!build.metadata["app"].contains_key("icon"));
    }

    #[test]
    fn declaration_order_decides_shared_module() {
        let fixture = Fixture::new();
        chain(&fixture);
        fixture.package("packages/top", r#"{"dependencies": ["b", "c"]}"#);
        fixture.file("packages/top/lib/main.js", "require('shared');");
        fixture.package("packages/b", "{}");
        fixture.file("packages/b/lib/shared.js", "");
        fixture.package("packages/c", "{}");
        fixture.file("packages/c/lib/shared.js", "");

        let (_, build) = assemble_fixture(&fixture, "top", &options()).unwrap();
        let main = &build.manifest["resource://guid-top-lib/main.js"];
        assert_eq!(
            main.requires["shared"].url.as_deref(),
            Some("resource://guid-b-lib/shared.js")
        );

        fixture.package("packages/top", r#"{"dependencies": ["c", "b"]}"#);
        let (_, build) = assemble_fixture(&fixture, "top", &options()).unwrap();
        let main = &build.manifest["resource://guid-top-lib/main.js"];
        assert_eq!(
            main.requires["shared"].url.as_deref(),
            Some("resource://guid-c-lib/shared.js")
        );
    }

    #[test]
    fn relative_imports_resolve_within_their_own_section() {
        let fixture = Fixture::new();
        chain(&fixture);
        fixture.file("packages/app/lib/helper.js", "");
        fixture.file("packages/app/tests/helper.js", "");
        fixture.file("packages/app/tests/test-a.js", "require('./helper');");

        let (_, build) = assemble_fixture(&fixture, "app", &options()).unwrap();
        assert!(build
            .root_paths
            .contains(&"resource://guid-app-lib/".to_string()));
        let test_a = &build.manifest["resource://guid-app-tests/test-a.js"];
        assert_eq!(
            test_a.requires["./helper"].url.as_deref(),
            Some("resource://guid-app-tests/helper.js")
        );
    }

    #[test]
    fn lib_modules_cannot_import_tests_relatively() {
        let fixture = Fixture::new();
        chain(&fixture);
        fixture.file("packages/app/lib/uses-test.js", "require('./test-helper');");
        fixture.file("packages/app/tests/test-helper.js", "");

        let strict = BuildOptions {
            unresolved_imports: UnresolvedImports::Deny,
            ..options()
        };
        let err = assemble_fixture(&fixture, "app", &strict).unwrap_err();
        match err {
            BuildError::Link(LinkError::Unresolved(unresolved)) => {
                assert_eq!(unresolved.len(), 1);
                assert_eq!(unresolved[0].import, "./test-helper");
                assert_eq!(unresolved[0].module, "resource://guid-app-lib/uses-test.js");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
