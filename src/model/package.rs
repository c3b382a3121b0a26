use std::{
    borrow::Borrow,
    fmt::Display,
    path::{Path, PathBuf},
};

use log::trace;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::ParseError;

pub const DESCRIPTOR_FILE_NAME: &str = "package.json";
pub const DEFAULT_PROGRAM_MODULE: &str = "main";
pub const DEFAULT_ICON: &str = "icon.png";
pub const DEFAULT_ICON64: &str = "icon64.png";

/// Descriptor properties copied into the metadata of a build.
pub const METADATA_PROPS: [&str; 10] = [
    "name",
    "description",
    "keywords",
    "author",
    "version",
    "contributors",
    "license",
    "url",
    "icon",
    "icon64",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    pub fn new(s: impl Into<String>) -> Self {
        PackageName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        PackageName(s)
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        PackageName(s.to_string())
    }
}

/// A package descriptor after defaults and normalization have been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageConfig {
    pub name: PackageName,
    pub root_dir: PathBuf,
    pub lib: Vec<String>,
    pub tests: Vec<String>,
    pub data: Vec<String>,
    pub packages: Vec<String>,
    pub dependencies: Vec<PackageName>,
    pub main: Option<String>,
    pub loader: Option<String>,
    pub icon: Option<String>,
    pub icon64: Option<String>,
    pub plugins: Vec<String>,
    /// Descriptive and unrecognized keys, passed through untouched.
    pub properties: Map<String, Value>,
}

impl PackageConfig {
    /// An empty package, without any of the on-disk defaults.
    pub fn new(name: impl Into<PackageName>, root_dir: impl Into<PathBuf>) -> Self {
        PackageConfig {
            name: name.into(),
            root_dir: root_dir.into(),
            lib: vec![],
            tests: vec![],
            data: vec![],
            packages: vec![],
            dependencies: vec![],
            main: None,
            loader: None,
            icon: None,
            icon64: None,
            plugins: vec![],
            properties: Map::new(),
        }
    }

    /// Loads the descriptor of the package rooted at `path`.
    pub fn from_dir(path: &Path) -> Result<PackageConfig, ParseError> {
        let root_dir = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let descriptor = root_dir.join(DESCRIPTOR_FILE_NAME);
        if !descriptor.is_file() {
            return Err(ParseError::MalformedPackage {
                file: DESCRIPTOR_FILE_NAME.to_string(),
                path: root_dir,
            });
        }
        trace!("Loading package descriptor {}", descriptor.display());
        let contents = std::fs::read_to_string(&descriptor)?;
        Self::from_json_str(&contents, &root_dir, &descriptor)
    }

    /// Parses descriptor text. `descriptor` is only used in error messages.
    pub fn from_json_str(
        data: &str,
        root_dir: &Path,
        descriptor: &Path,
    ) -> Result<PackageConfig, ParseError> {
        let value: Value =
            serde_json::from_str(data).map_err(|err| ParseError::MalformedJson {
                path: descriptor.to_path_buf(),
                message: err.to_string(),
            })?;
        let Value::Object(mut map) = value else {
            return Err(ParseError::MalformedJson {
                path: descriptor.to_path_buf(),
                message: "expected a JSON object".to_string(),
            });
        };

        let mut fields = Fields { map: &mut map, path: descriptor };
        let name = match fields.take_string("name")? {
            Some(name) => name,
            None => default_name(root_dir).ok_or_else(|| ParseError::InvalidField {
                path: descriptor.to_path_buf(),
                key: "name".to_string(),
                expected: "a non-empty string",
            })?,
        };
        if name.is_empty() {
            return Err(ParseError::InvalidField {
                path: descriptor.to_path_buf(),
                key: "name".to_string(),
                expected: "a non-empty string",
            });
        }

        let mut config = PackageConfig {
            name: PackageName::new(name),
            root_dir: root_dir.to_path_buf(),
            lib: fields.take_string_list("lib")?,
            tests: fields.take_string_list("tests")?,
            data: fields.take_string_list("data")?,
            packages: fields.take_string_list("packages")?,
            dependencies: fields
                .take_string_list("dependencies")?
                .into_iter()
                .map(PackageName::new)
                .collect(),
            main: fields.take_string("main")?,
            loader: fields.take_string("loader")?,
            icon: fields.take_string("icon")?,
            icon64: fields.take_string("icon64")?,
            plugins: fields.take_string_list("plugins")?,
            properties: Map::new(),
        };
        config.properties = map;
        config.apply_defaults();
        Ok(config)
    }

    fn apply_defaults(&mut self) {
        for (dirs, dirname) in [
            (&mut self.lib, "lib"),
            (&mut self.tests, "tests"),
            (&mut self.data, "data"),
            (&mut self.packages, "packages"),
        ] {
            if dirs.is_empty() && self.root_dir.join(dirname).is_dir() {
                dirs.push(dirname.to_string());
            }
        }

        if self.icon.is_none() && self.root_dir.join(DEFAULT_ICON).is_file() {
            self.icon = Some(DEFAULT_ICON.to_string());
        }
        if self.icon64.is_none() && self.root_dir.join(DEFAULT_ICON64).is_file() {
            self.icon64 = Some(DEFAULT_ICON64.to_string());
        }

        if self.main.is_none() && self.has_lib_module(DEFAULT_PROGRAM_MODULE) {
            self.main = Some(DEFAULT_PROGRAM_MODULE.to_string());
        }
    }

    pub fn resolve_dir(&self, dirname: &str) -> PathBuf {
        self.root_dir.join(dirname)
    }

    pub fn resolve_dirs<'a>(&'a self, dirnames: &'a [String]) -> impl Iterator<Item = PathBuf> + 'a {
        dirnames.iter().map(|dirname| self.resolve_dir(dirname))
    }

    /// Whether `<module>.js` exists directly under one of the lib directories.
    pub fn has_lib_module(&self, module: &str) -> bool {
        let filename = format!("{module}.js");
        self.resolve_dirs(&self.lib)
            .any(|dir| dir.join(&filename).is_file())
    }

    /// Descriptive properties that are present and non-empty.
    pub fn metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        for prop in METADATA_PROPS {
            let value = match prop {
                "name" => Some(Value::String(self.name.to_string())),
                "icon" => self.icon.clone().map(Value::String),
                "icon64" => self.icon64.clone().map(Value::String),
                other => self.properties.get(other).cloned(),
            };
            if let Some(value) = value.filter(is_truthy) {
                metadata.insert(prop.to_string(), value);
            }
        }
        metadata
    }
}

fn default_name(root_dir: &Path) -> Option<String> {
    root_dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

struct Fields<'a> {
    map: &'a mut Map<String, Value>,
    path: &'a Path,
}

impl Fields<'_> {
    fn take_string(&mut self, key: &str) -> Result<Option<String>, ParseError> {
        match self.map.remove(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(self.invalid(key, "a string")),
        }
    }

    /// A bare string is shorthand for a one-element list.
    fn take_string_list(&mut self, key: &str) -> Result<Vec<String>, ParseError> {
        match self.map.remove(key) {
            None | Some(Value::Null) => Ok(vec![]),
            Some(Value::String(s)) if s.is_empty() => Ok(vec![]),
            Some(Value::String(s)) => Ok(vec![s]),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    _ => Err(self.invalid(key, "a string or a list of strings")),
                })
                .collect(),
            Some(_) => Err(self.invalid(key, "a string or a list of strings")),
        }
    }

    fn invalid(&self, key: &str, expected: &'static str) -> ParseError {
        ParseError::InvalidField {
            path: self.path.to_path_buf(),
            key: key.to_string(),
            expected,
        }
    }
}
