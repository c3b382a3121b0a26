use std::{collections::BTreeMap, fmt::Display, path::PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use super::{namespace::ResourceNamespace, package::PackageName};

/// Per-module facts keyed by the module's `resource://` URL.
pub type Manifest = BTreeMap<String, ModuleRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Lib,
    Tests,
    Data,
}

impl Section {
    pub fn is_code(&self) -> bool {
        matches!(self, Section::Lib | Section::Tests)
    }
}

impl Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Section::Lib => f.write_str("lib"),
            Section::Tests => f.write_str("tests"),
            Section::Data => f.write_str("data"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequireEntry {
    /// Location of the resolved module, filled in by the linker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// First line the import was seen on, when known.
    #[serde(skip)]
    pub line: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    pub package_name: PackageName,
    pub section: Section,
    /// Slash separated path inside the section, without the `.js` extension.
    pub module_name: String,
    /// Lowercase hex SHA-256 of the file contents.
    pub content_hash: String,
    pub requires: BTreeMap<String, RequireEntry>,
    pub wants_chrome: bool,
    pub has_violation: bool,
    pub resource_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e10s_adapter: Option<String>,
}

impl ModuleRecord {
    /// The directory part of the module name, as path segments.
    pub fn module_dir(&self) -> Vec<&str> {
        let mut segments: Vec<&str> = self.module_name.split('/').collect();
        segments.pop();
        segments
    }
}

/// Everything the packaging and launch steps need to mount and load a
/// target and its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildArtifact {
    pub resources: BTreeMap<ResourceNamespace, PathBuf>,
    pub resource_packages: BTreeMap<ResourceNamespace, PackageName>,
    /// Code roots searched for absolute imports, first match wins.
    pub root_paths: Vec<String>,
    pub package_data: BTreeMap<PackageName, String>,
    pub manifest: Manifest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon64: Option<PathBuf>,
    pub metadata: BTreeMap<PackageName, Map<String, Value>>,
}
