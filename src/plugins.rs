use std::{collections::HashMap, path::Path};

use log::{debug, info};
use thiserror::Error;

use crate::{graph::PackageGraph, model::package::PackageName, resolver::DependencySet};

/// A build-time hook a package can ask for through its `plugins` field.
pub trait Plugin {
    /// Called once per declaring package, with the package's root directory.
    fn init(&self, root_dir: &Path) -> anyhow::Result<()>;
}

impl<F> Plugin for F
where
    F: Fn(&Path) -> anyhow::Result<()>,
{
    fn init(&self, root_dir: &Path) -> anyhow::Result<()> {
        self(root_dir)
    }
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Package {package} requires plugin `{plugin}`, which is not registered")]
    Unregistered { package: PackageName, plugin: String },
    #[error("Plugin `{plugin}` failed for package {package}: {source}")]
    Failed {
        package: PackageName,
        plugin: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Box<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `plugin` under `id`, replacing any previous registration.
    pub fn register(&mut self, id: impl Into<String>, plugin: impl Plugin + 'static) {
        self.plugins.insert(id.into(), Box::new(plugin));
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Runs the declared plugins of every package in `deps`, in dependency
    /// set order. Returns the number of plugin invocations.
    pub fn call_plugins(
        &self,
        graph: &PackageGraph,
        deps: &DependencySet,
    ) -> Result<usize, PluginError> {
        let mut calls = 0;
        for config in deps.iter().filter_map(|name| graph.get(name.as_str())) {
            for id in &config.plugins {
                let plugin = self
                    .plugins
                    .get(id)
                    .ok_or_else(|| PluginError::Unregistered {
                        package: config.name.clone(),
                        plugin: id.clone(),
                    })?;
                debug!("Running plugin {} for {}", id, config.name);
                plugin
                    .init(&config.root_dir)
                    .map_err(|source| PluginError::Failed {
                        package: config.name.clone(),
                        plugin: id.clone(),
                        source,
                    })?;
                calls += 1;
            }
        }
        if calls > 0 {
            info!("Ran {} package plugins", calls);
        }
        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, path::PathBuf, rc::Rc};

    use super::*;

    use crate::{model::package::PackageConfig, resolver::resolve};
    use pretty_assertions::assert_eq;

    fn graph() -> PackageGraph {
        let mut graph = PackageGraph::default();
        let mut app = PackageConfig::new("app", "/packages/app");
        app.dependencies = vec!["widgets".into()];
        app.plugins = vec!["bundler".to_string()];
        let mut widgets = PackageConfig::new("widgets", "/packages/widgets");
        widgets.plugins = vec!["bundler".to_string()];
        graph.insert(app);
        graph.insert(widgets);
        graph.insert(PackageConfig::new("unused", "/packages/unused"));
        graph
    }

    #[test]
    fn calls_declared_plugins_for_each_dependency() {
        let graph = graph();
        let deps = resolve(&graph, &["app".into()]).unwrap();
        let seen = Rc::new(RefCell::new(Vec::<PathBuf>::new()));

        let mut registry = PluginRegistry::new();
        let recorder = seen.clone();
        registry.register("bundler", move |root: &Path| -> anyhow::Result<()> {
            recorder.borrow_mut().push(root.to_path_buf());
            Ok(())
        });

        assert_eq!(registry.call_plugins(&graph, &deps).unwrap(), 2);
        assert_eq!(
            *seen.borrow(),
            vec![
                PathBuf::from("/packages/app"),
                PathBuf::from("/packages/widgets")
            ]
        );
    }

    #[test]
    fn unregistered_plugin_fails() {
        let graph = graph();
        let deps = resolve(&graph, &["app".into()]).unwrap();
        let err = PluginRegistry::new()
            .call_plugins(&graph, &deps)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Package app requires plugin `bundler`, which is not registered"
        );
    }

    #[test]
    fn plugin_failure_names_the_package() {
        let graph = graph();
        let deps = resolve(&graph, &["widgets".into()]).unwrap();
        let mut registry = PluginRegistry::new();
        registry.register("bundler", |_: &Path| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("boom"))
        });

        let err = registry.call_plugins(&graph, &deps).unwrap_err();
        assert!(
            matches!(&err, PluginError::Failed { package, .. } if package.as_str() == "widgets"),
            "{err:?}"
        );
        assert_eq!(
            err.to_string(),
            "Plugin `bundler` failed for package widgets: boom"
        );
    }
}
