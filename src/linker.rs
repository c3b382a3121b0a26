use std::fmt::Display;

use log::{debug, trace, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::model::{
    build::{Manifest, ModuleRecord, Section},
    package::PackageName,
};

/// Modules named `<module><suffix>` adapt `<module>` for out-of-process use.
pub const E10S_ADAPTER_SUFFIX: &str = "-e10s-adapter";

const MODULE_EXTENSION: &str = "js";

/// What to do with imports that resolve to no known module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedImports {
    /// Log a warning and keep building.
    #[default]
    Warn,
    /// Fail the build.
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedImport {
    pub package: PackageName,
    /// URL of the requiring module.
    pub module: String,
    pub import: String,
    pub line: Option<usize>,
    /// Packages outside the dependency set that provide the module.
    pub candidates: Vec<PackageName>,
}

impl Display for UnresolvedImport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Module '{}' required by {}", self.import, self.module)?;
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        write!(f, " not found")?;
        if !self.candidates.is_empty() {
            let candidates: Vec<&str> = self.candidates.iter().map(|c| c.as_str()).collect();
            write!(
                f,
                "; it is provided by {}, add a dependency on it",
                candidates.join(", ")
            )?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Relative import `{import}` in {module} of package {package} goes above the package root")]
    RelativeEscape {
        package: PackageName,
        module: String,
        import: String,
    },
    #[error("{} unresolved imports:\n{}", .0.len(), render_list(.0))]
    Unresolved(Vec<UnresolvedImport>),
}

fn render_list(unresolved: &[UnresolvedImport]) -> String {
    unresolved
        .iter()
        .map(|u| format!("  {u}"))
        .collect::<Vec<_>>()
        .join("\n")
}

struct Resolution {
    key: String,
    import: String,
    url: Option<String>,
}

/// Resolves every import of every module in `manifest` and records the
/// resolved URL on the import.
///
/// Relative imports (`./x`, `../x`) are looked up in the directory the
/// requiring module is mounted from, then in the other directories of the
/// same package section. Absolute imports are looked up in each of
/// `root_paths` in turn and the first match wins. Imports from test modules
/// or from modules that asked for chrome are allowed to stay unresolved;
/// any other unresolved import is returned.
pub fn link(
    manifest: &mut Manifest,
    root_paths: &[String],
) -> Result<Vec<UnresolvedImport>, LinkError> {
    let mut resolutions: Vec<Resolution> = Vec::new();
    let mut adapters: Vec<(String, String)> = Vec::new();
    let mut unresolved: Vec<UnresolvedImport> = Vec::new();

    for (key, record) in manifest.iter() {
        for (import, entry) in &record.requires {
            let url = if is_relative(import) {
                let target = resolve_relative(record, import)?;
                find_relative(manifest, root_paths, record, &target)
            } else {
                find_module(manifest, root_paths, import, |_| true)
            };

            match &url {
                Some(url) => trace!("{} resolves '{}' to {}", key, import, url),
                None if record.wants_chrome || record.section == Section::Tests => {
                    trace!("Leaving '{}' of {} unresolved", import, key)
                }
                None => unresolved.push(UnresolvedImport {
                    package: record.package_name.clone(),
                    module: key.clone(),
                    import: import.clone(),
                    line: entry.line,
                    candidates: vec![],
                }),
            }
            resolutions.push(Resolution {
                key: key.clone(),
                import: import.clone(),
                url,
            });
        }

        let adapter = format!("{}{E10S_ADAPTER_SUFFIX}", record.module_name);
        if let Some(url) = find_module(manifest, root_paths, &adapter, |_| true) {
            adapters.push((key.clone(), url));
        }
    }

    for Resolution { key, import, url } in resolutions {
        if let Some(entry) = manifest
            .get_mut(&key)
            .and_then(|record| record.requires.get_mut(&import))
        {
            entry.url = url;
        }
    }
    for (key, url) in adapters {
        if let Some(record) = manifest.get_mut(&key) {
            record.e10s_adapter = Some(url);
        }
    }

    debug!(
        "Linked {} modules, {} unresolved imports",
        manifest.len(),
        unresolved.len()
    );
    Ok(unresolved)
}

/// Applies the unresolved import policy.
pub fn check_unresolved(
    unresolved: Vec<UnresolvedImport>,
    policy: UnresolvedImports,
) -> Result<(), LinkError> {
    if unresolved.is_empty() {
        return Ok(());
    }
    match policy {
        UnresolvedImports::Deny => Err(LinkError::Unresolved(unresolved)),
        UnresolvedImports::Warn => {
            for import in &unresolved {
                warn!("{}", import);
            }
            Ok(())
        }
    }
}

fn is_relative(import: &str) -> bool {
    matches!(import.split('/').next(), Some(".") | Some(".."))
}

/// Module name that `import` designates, relative to the directory of
/// `record`.
fn resolve_relative(record: &ModuleRecord, import: &str) -> Result<String, LinkError> {
    let mut segments = record.module_dir();
    for segment in import.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(LinkError::RelativeEscape {
                        package: record.package_name.clone(),
                        module: record.module_name.clone(),
                        import: import.to_string(),
                    });
                }
            }
            segment => segments.push(segment),
        }
    }
    Ok(segments.join("/"))
}

fn find_relative(
    manifest: &Manifest,
    root_paths: &[String],
    record: &ModuleRecord,
    module: &str,
) -> Option<String> {
    let own_file = format!("{}.{MODULE_EXTENSION}", record.module_name);
    let own_match = record
        .resource_url
        .strip_suffix(&own_file)
        .and_then(|root| manifest.get(&format!("{root}{module}.{MODULE_EXTENSION}")));
    if let Some(found) = own_match {
        return Some(found.resource_url.clone());
    }
    find_module(manifest, root_paths, module, |candidate| {
        candidate.package_name == record.package_name && candidate.section == record.section
    })
}

fn find_module(
    manifest: &Manifest,
    root_paths: &[String],
    module: &str,
    accept: impl Fn(&ModuleRecord) -> bool,
) -> Option<String> {
    root_paths.iter().find_map(|root| {
        let key = format!("{root}{module}.{MODULE_EXTENSION}");
        manifest
            .get(&key)
            .filter(|record| accept(record))
            .map(|record| record.resource_url.clone())
    })
}
