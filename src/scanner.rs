//! Best-effort static scanner for module sources.
//!
//! This is a line oriented pattern matcher, not a JavaScript parser. Known
//! blind spots:
//! * import paths computed at runtime (`require("a" + b)`) are not detected;
//! * a line is only treated as a comment when it *starts* with a comment
//!   marker, so the body of a block comment whose lines do not start with
//!   `*` is scanned like code;
//! * list declarations (`define([...])`) are matched over the whole file and
//!   do not carry line numbers.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    path::{Path, PathBuf},
};

use log::{debug, trace};
use regex_lite::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::model::{
    build::{ModuleRecord, RequireEntry, Section},
    package::PackageName,
};

/// Trimmed lines or clauses starting with one of these are ignored.
pub const COMMENT_PREFIXES: [&str; 5] = ["//", "/*", "*", "'", "\""];

/// Markers of real comments, as opposed to lines continuing a string.
const CODE_COMMENT_PREFIXES: [&str; 3] = ["//", "/*", "*"];

/// Short names conventionally bound to the privileged capabilities.
pub const CHROME_ALIASES: [&str; 5] = ["Cc", "Ci", "Cu", "Cr", "Cm"];

/// The pseudo-module granting privileged capabilities.
pub const CHROME_MODULE: &str = "chrome";

const CHROME_NAMESPACE: &str = "Components.";

/// The module loader itself is allowed to touch privileged APIs.
pub const LOADER_FILENAMES: [&str; 2] = ["cuddlefish.js", "securable-module.js"];

const MODULE_EXTENSION: &str = "js";

const REQUIRE_PATTERN: &str = r#"require\s*\(\s*['"]([^'"]+?)['"]\s*\)"#;
const DEFINE_PATTERN: &str =
    r#"(?:require|define)\s*\(\s*(?:['"][^'"]+['"]\s*,\s*)?\[([^\]]*)\]"#;
const QUOTED_PATTERN: &str = r#"^['"]([^'"]+)['"]$"#;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error while scanning {}: {source}", path.display())]
    IO {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A usage of privileged capabilities that was not asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffendingLine {
    /// The alias used on this line, `None` for direct namespace access.
    pub alias: Option<String>,
    pub lineno: usize,
    pub text: String,
}

/// Everything needed to tell the author how to declare the privileged
/// access their module performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromeDiagnostic {
    pub file: PathBuf,
    pub lines: Vec<OffendingLine>,
    /// Names to destructure from the `chrome` module.
    pub needed: Vec<String>,
}

impl ChromeDiagnostic {
    pub fn remediation(&self) -> String {
        format!(
            "const {{{}}} = require(\"{CHROME_MODULE}\");",
            self.needed.join(",")
        )
    }
}

impl Display for ChromeDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "To use chrome authority, as in:")?;
        writeln!(f, " {}", self.file.display())?;
        for line in &self.lines {
            writeln!(f, " {}> {}", line.lineno, line.text)?;
        }
        writeln!(f, "You must enable it with something like:")?;
        write!(f, "  {}", self.remediation())
    }
}

/// Facts extracted from one module source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleScan {
    /// Import names mapped to the first line they appear on, when known.
    pub requires: BTreeMap<String, Option<usize>>,
    pub wants_chrome: bool,
    pub diagnostic: Option<ChromeDiagnostic>,
}

impl ModuleScan {
    pub fn has_violation(&self) -> bool {
        self.diagnostic.is_some()
    }
}

/// The modules of one code section.
#[derive(Debug, Clone, Default)]
pub struct SectionScan {
    pub records: Vec<ModuleRecord>,
    pub diagnostics: Vec<ChromeDiagnostic>,
}

pub struct Scanner {
    require_re: Regex,
    define_re: Regex,
    quoted_re: Regex,
    alias_res: Vec<(&'static str, Regex)>,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    pub fn new() -> Self {
        Scanner {
            require_re: Regex::new(REQUIRE_PATTERN).unwrap(),
            define_re: Regex::new(DEFINE_PATTERN).unwrap(),
            quoted_re: Regex::new(QUOTED_PATTERN).unwrap(),
            alias_res: CHROME_ALIASES
                .iter()
                .map(|alias| (*alias, Regex::new(&format!(r"\b{alias}\b")).unwrap()))
                .collect(),
        }
    }

    /// Scans the source text of the module at `path`. The path is used for
    /// the loader exemption and in diagnostics only.
    pub fn scan_module(&self, path: &Path, source: &str) -> ModuleScan {
        let lines: Vec<&str> = source.lines().collect();
        let mut requires = self.scan_requires(&lines);
        requires.remove(CHROME_MODULE);
        let (wants_chrome, diagnostic) = self.scan_chrome(path, &lines);
        ModuleScan {
            requires,
            wants_chrome,
            diagnostic,
        }
    }

    fn scan_requires(&self, lines: &[&str]) -> BTreeMap<String, Option<usize>> {
        let mut requires = BTreeMap::new();
        for (lineno0, line) in lines.iter().enumerate() {
            for clause in line.split(';') {
                let clause = clause.trim();
                if is_comment(clause) {
                    continue;
                }
                for name in self.required_names(clause) {
                    requires
                        .entry(name.to_string())
                        .or_insert(Some(lineno0 + 1));
                }
            }
        }

        // List declarations may span several lines.
        let code = lines
            .iter()
            .filter(|line| {
                let line = line.trim();
                !CODE_COMMENT_PREFIXES
                    .iter()
                    .any(|prefix| line.starts_with(prefix))
            })
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        for caps in self.define_re.captures_iter(&code) {
            let Some(list) = caps.get(1) else { continue };
            for item in list.as_str().split(',') {
                let Some(quoted) = self.quoted_re.captures(item.trim()) else {
                    continue;
                };
                let Some(name) = quoted.get(1) else { continue };
                if name.as_str() != "exports" {
                    requires.entry(name.as_str().to_string()).or_insert(None);
                }
            }
        }
        requires
    }

    /// Literal `require("...")` arguments in `text`, skipping calls that sit
    /// directly inside a string literal.
    fn required_names<'t>(&self, text: &'t str) -> Vec<&'t str> {
        self.require_re
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let quoted = text[..whole.start()].ends_with(['\'', '"']);
                if quoted {
                    None
                } else {
                    caps.get(1).map(|name| name.as_str())
                }
            })
            .collect()
    }

    fn scan_chrome(&self, path: &Path, lines: &[&str]) -> (bool, Option<ChromeDiagnostic>) {
        let exempt = path
            .file_name()
            .is_some_and(|name| LOADER_FILENAMES.iter().any(|loader| name == *loader));
        if exempt {
            trace!("{} is a loader file, not checking chrome usage", path.display());
            return (false, None);
        }

        let mut asks_for_chrome: BTreeSet<&str> = BTreeSet::new();
        let mut asks_for_all_chrome = false;
        let mut uses_chrome: BTreeSet<&str> = BTreeSet::new();
        let mut uses_components = false;
        let mut uses_chrome_at: Vec<OffendingLine> = Vec::new();

        for (lineno0, line) in lines.iter().enumerate() {
            let line = line.trim();
            if is_comment(line) {
                continue;
            }
            if self.required_names(line).contains(&CHROME_MODULE) {
                for alias in CHROME_ALIASES {
                    if line.contains(alias) {
                        asks_for_chrome.insert(alias);
                    }
                }
                if asks_for_chrome.is_empty() {
                    asks_for_all_chrome = true;
                }
            }

            let mut alias_in_this_line = false;
            for (alias, re) in &self.alias_res {
                if re.is_match(line) {
                    alias_in_this_line = true;
                    uses_chrome.insert(*alias);
                    uses_chrome_at.push(OffendingLine {
                        alias: Some(alias.to_string()),
                        lineno: lineno0 + 1,
                        text: line.to_string(),
                    });
                }
            }

            if !alias_in_this_line && line.contains(CHROME_NAMESPACE) {
                uses_components = true;
                uses_chrome_at.push(OffendingLine {
                    alias: None,
                    lineno: lineno0 + 1,
                    text: line.to_string(),
                });
                break;
            }
        }

        let granted = |alias: &str| asks_for_all_chrome || asks_for_chrome.contains(alias);
        let unrequested = uses_chrome.iter().any(|alias| !granted(alias));
        let wants_chrome = asks_for_all_chrome || !asks_for_chrome.is_empty();

        if !uses_components && !unrequested {
            return (wants_chrome, None);
        }

        let lines = uses_chrome_at
            .into_iter()
            .filter(|usage| usage.alias.as_deref().map_or(true, |alias| !granted(alias)))
            .collect();
        let mut needed: Vec<String> = uses_chrome.iter().map(|alias| alias.to_string()).collect();
        if uses_components {
            needed.push("components".to_string());
        }
        let diagnostic = ChromeDiagnostic {
            file: path.to_path_buf(),
            lines,
            needed,
        };
        debug!("Unrequested chrome usage in {}", path.display());
        (wants_chrome, Some(diagnostic))
    }

    /// Scans every module of a code section rooted at `dir`. `namespace_url`
    /// is the `resource://` URL the section is mounted at.
    pub fn scan_section(
        &self,
        package: &PackageName,
        section: Section,
        dir: &Path,
        namespace_url: &str,
    ) -> Result<SectionScan, ScanError> {
        let mut scan = SectionScan::default();
        for file in find_module_files(dir)? {
            let module_name = module_name(dir, &file);
            let bytes = std::fs::read(&file).map_err(|source| ScanError::IO {
                path: file.clone(),
                source,
            })?;
            let source = String::from_utf8_lossy(&bytes);
            let module = self.scan_module(&file, &source);
            trace!(
                "Scanned {} ({} requires)",
                file.display(),
                module.requires.len()
            );

            let has_violation = module.has_violation();
            if let Some(diagnostic) = module.diagnostic {
                scan.diagnostics.push(diagnostic);
            }
            scan.records.push(ModuleRecord {
                package_name: package.clone(),
                section,
                resource_url: format!("{namespace_url}{module_name}.{MODULE_EXTENSION}"),
                module_name,
                content_hash: content_hash(&bytes),
                requires: module
                    .requires
                    .into_iter()
                    .map(|(name, line)| (name, RequireEntry { url: None, line }))
                    .collect(),
                wants_chrome: module.wants_chrome,
                has_violation,
                e10s_adapter: None,
            });
        }
        Ok(scan)
    }
}

fn is_comment(text: &str) -> bool {
    COMMENT_PREFIXES
        .iter()
        .any(|prefix| text.starts_with(prefix))
}

pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// `<dir>/content/foo.js` becomes `content/foo`.
fn module_name(dir: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(dir).unwrap_or(file).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Module sources under `dir`, recursively, in a stable order. Symlinked
/// directories are not descended into.
fn find_module_files(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let io_err = |source| ScanError::IO {
        path: dir.to_path_buf(),
        source,
    };
    let mut files: Vec<PathBuf> = Vec::new();
    if dir.is_dir() {
        let mut entries = std::fs::read_dir(dir)
            .map_err(io_err)?
            .map(|entry| entry.and_then(|e| Ok((e.path(), e.file_type()?))))
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (path, file_type) in entries {
            if file_type.is_dir() {
                files.append(&mut find_module_files(&path)?);
            } else if path.extension().is_some_and(|ext| ext == MODULE_EXTENSION)
                && path.is_file()
            {
                files.push(path);
            }
        }
    }
    Ok(files)
}
