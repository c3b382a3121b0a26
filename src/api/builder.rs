use std::{env, error::Error, path::PathBuf};

use crate::{
    assemble::{BuildOptions, DEFAULT_LOADER},
    config::PacklinkConfig,
    graph::MissingDescriptor,
    linker::UnresolvedImports,
    model::package::PackageName,
    plugins::{Plugin, PluginRegistry},
    Packlink,
};

#[derive(Default)]
pub struct PacklinkBuilder {
    // Package directories are relative to `root`
    root: Option<PathBuf>,
    prefix: Option<String>,
    include_tests: Option<bool>,
    include_dep_tests: Option<bool>,
    default_loader: Option<String>,
    unresolved_imports: Option<UnresolvedImports>,
    missing_descriptor: Option<MissingDescriptor>,
    plugins: PluginRegistry,
}

impl PacklinkBuilder {
    /// Project root directory, the one holding the shared `packages` directory.
    ///
    /// Defaults to the current directory.
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.root = Some(path.into());
        self
    }

    /// Prepended to every resource namespace.
    ///
    /// Defaults to the `prefix` setting, or no prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Whether test sections are mounted at all.
    ///
    /// Defaults to `true`.
    pub fn include_tests(mut self, include_tests: bool) -> Self {
        self.include_tests = Some(include_tests);
        self
    }

    pub fn include_dep_tests(mut self, include_dep_tests: bool) -> Self {
        self.include_dep_tests = Some(include_dep_tests);
        self
    }

    /// Package providing the loader when no dependency declares one.
    ///
    /// Defaults to `api-utils`.
    pub fn default_loader(mut self, package: impl Into<String>) -> Self {
        self.default_loader = Some(package.into());
        self
    }

    pub fn unresolved_imports(mut self, policy: UnresolvedImports) -> Self {
        self.unresolved_imports = Some(policy);
        self
    }

    /// What to do with directories under `packages` that have no descriptor.
    ///
    /// Defaults to failing the build.
    pub fn missing_descriptor(mut self, policy: MissingDescriptor) -> Self {
        self.missing_descriptor = Some(policy);
        self
    }

    pub fn plugin(mut self, id: impl Into<String>, plugin: impl Plugin + 'static) -> Self {
        self.plugins.register(id, plugin);
        self
    }

    pub fn try_build(self) -> Result<Packlink, Box<dyn Error>> {
        let Self {
            root,
            prefix,
            include_tests,
            include_dep_tests,
            default_loader,
            unresolved_imports,
            missing_descriptor,
            plugins,
        } = self;
        let root = match root {
            Some(root) => root,
            None => env::current_dir()?,
        };

        let config = PacklinkConfig::load(&root)?;

        let unresolved_imports = unresolved_imports.unwrap_or(match config.strict {
            Some(true) => UnresolvedImports::Deny,
            _ => UnresolvedImports::Warn,
        });

        let options = BuildOptions {
            prefix: prefix.or(config.prefix).unwrap_or_default(),
            include_tests: include_tests.unwrap_or(true),
            include_dep_tests: include_dep_tests
                .or(config.include_dep_tests)
                .unwrap_or(false),
            default_loader: PackageName::new(
                default_loader
                    .or(config.default_loader)
                    .unwrap_or_else(|| DEFAULT_LOADER.to_string()),
            ),
            unresolved_imports,
        };

        Ok(Packlink {
            root,
            options,
            missing_descriptor: missing_descriptor.unwrap_or_default(),
            plugins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::Fixture;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let fixture = Fixture::new();
        let packlink = Packlink::builder().root(fixture.root()).try_build().unwrap();
        assert_eq!(packlink.options(), &BuildOptions::default());
        assert_eq!(packlink.root(), fixture.root());
    }

    #[test]
    fn explicit_values_override_settings_file() {
        let fixture = Fixture::new();
        fixture.file(
            "packlink.toml",
            "prefix = \"file-\"\nstrict = true\ndefault_loader = \"my-loader\"\n",
        );

        let packlink = Packlink::builder().root(fixture.root()).try_build().unwrap();
        assert_eq!(packlink.options().prefix, "file-");
        assert_eq!(
            packlink.options().unresolved_imports,
            UnresolvedImports::Deny
        );
        assert_eq!(packlink.options().default_loader.as_str(), "my-loader");

        let packlink = Packlink::builder()
            .root(fixture.root())
            .prefix("guid-")
            .unresolved_imports(UnresolvedImports::Warn)
            .try_build()
            .unwrap();
        assert_eq!(packlink.options().prefix, "guid-");
        assert_eq!(
            packlink.options().unresolved_imports,
            UnresolvedImports::Warn
        );
    }
}
