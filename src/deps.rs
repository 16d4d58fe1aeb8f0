//! Dependency validation: reconcile a candidate's imports against the local
//! environment and a public package registry.

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, instrument, warn};

/// Seam over the local interpreter environment so reconciliation is testable
/// without spawning a real interpreter.
pub trait LocalProbe {
    /// Whether `source` is a syntactically valid script for the target
    /// interpreter.
    fn parses(&self, source: &str) -> Result<bool>;
    /// Whether `name` can already be imported locally.
    fn has_module(&self, name: &str) -> Result<bool>;
    /// Install `name` into the environment that will run the script.
    fn install(&self, name: &str) -> Result<()>;
}

/// Existence oracle for a public package registry.
pub trait PackageRegistry {
    /// Whether the registry knows a package by exactly this name.
    fn exists(&self, name: &str) -> Result<bool>;
}

/// Verdict of dependency reconciliation for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepsVerdict {
    /// Every import is importable (possibly after installation).
    Satisfied,
    /// The registry does not know this name: the generator hallucinated it.
    /// Fatal to the whole workflow, not just this task.
    Rejected { package: String },
}

static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^import\s+(.+?)\s*$").expect("import regex is valid"));
static FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^from\s+([A-Za-z_][A-Za-z0-9_.]*)\s+import\b").expect("from regex is valid")
});
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("name regex is valid"));

/// Scan source for top-level import statements and collapse dotted module
/// paths to their first segment.
///
/// The scan is lexical: comments and string-literal interiors are blanked
/// out first, then only unindented `import`/`from` lines count and relative
/// imports are skipped. Whether the source actually parses is a separate
/// question answered by [`LocalProbe::parses`] in [`reconcile`].
pub fn scan_imports(source: &str) -> BTreeSet<String> {
    let stripped = strip_noncode(source);
    let mut packages = BTreeSet::new();
    for line in stripped.lines() {
        if let Some(caps) = IMPORT_RE.captures(line) {
            // `import a.b as x, c` names both a and c.
            for item in caps[1].split(',') {
                let module = item.trim().split_whitespace().next().unwrap_or("");
                if let Some(top) = top_level_name(module) {
                    packages.insert(top);
                }
            }
        } else if let Some(caps) = FROM_RE.captures(line) {
            if let Some(top) = top_level_name(&caps[1]) {
                packages.insert(top);
            }
        }
    }
    packages
}

fn top_level_name(module: &str) -> Option<String> {
    let top = module.split('.').next()?;
    NAME_RE.is_match(top).then(|| top.to_string())
}

/// Blank out comments and string-literal interiors, keeping newlines so line
/// structure survives. An `import` line inside a docstring must not register
/// as a dependency.
fn strip_noncode(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            quote @ ('"' | '\'') => {
                let triple =
                    chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote);
                i += if triple { 3 } else { 1 };
                while i < chars.len() {
                    match chars[i] {
                        '\\' => i += 2,
                        '\n' => {
                            out.push('\n');
                            i += 1;
                            if !triple {
                                // Unterminated single-quoted string; resync
                                // at the newline.
                                break;
                            }
                        }
                        c if c == quote => {
                            if !triple {
                                i += 1;
                                break;
                            }
                            if chars.get(i + 1) == Some(&quote)
                                && chars.get(i + 2) == Some(&quote)
                            {
                                i += 3;
                                break;
                            }
                            i += 1;
                        }
                        _ => i += 1,
                    }
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Reconcile every import in `source`: already-importable names pass, names
/// the registry confirms are installed, and a name the registry does not know
/// is returned as [`DepsVerdict::Rejected`].
#[instrument(skip_all)]
pub fn reconcile(
    source: &str,
    probe: &dyn LocalProbe,
    registry: &dyn PackageRegistry,
) -> Result<DepsVerdict> {
    let packages = scan_imports(source);
    if packages.is_empty() {
        return Ok(DepsVerdict::Satisfied);
    }
    // A source that does not parse contributes no dependencies: its syntax
    // error surfaces through the execution step's nonzero exit instead of a
    // workflow-fatal registry verdict.
    if !probe.parses(source)? {
        warn!("candidate does not parse, deferring imports to execution");
        return Ok(DepsVerdict::Satisfied);
    }
    debug!(?packages, "found candidate dependencies");

    for package in &packages {
        if probe.has_module(package)? {
            continue;
        }
        debug!(package, "not importable locally, consulting registry");
        if registry.exists(package)? {
            probe.install(package)?;
        } else {
            warn!(package, "registry does not know this package");
            return Ok(DepsVerdict::Rejected {
                package: package.clone(),
            });
        }
    }
    Ok(DepsVerdict::Satisfied)
}

/// PyPI-style registry client: a package exists iff
/// `GET <base>/pypi/<name>/json` answers 2xx. Any other definitive response
/// condemns the name; transport failures are errors, not verdicts.
pub struct PypiRegistry {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl PypiRegistry {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build registry http client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl PackageRegistry for PypiRegistry {
    fn exists(&self, name: &str) -> Result<bool> {
        let url = format!("{}/pypi/{}/json", self.base_url.trim_end_matches('/'), name);
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("query registry for '{name}'"))?;
        debug!(package = name, status = %response.status(), "registry response");
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeProbe {
        present: Vec<&'static str>,
        syntax_ok: bool,
        installed: RefCell<Vec<String>>,
    }

    impl FakeProbe {
        fn with_present(present: Vec<&'static str>) -> Self {
            Self {
                present,
                syntax_ok: true,
                installed: RefCell::new(Vec::new()),
            }
        }

        fn rejecting_syntax() -> Self {
            Self {
                syntax_ok: false,
                ..Self::with_present(vec![])
            }
        }
    }

    impl LocalProbe for FakeProbe {
        fn parses(&self, _source: &str) -> Result<bool> {
            Ok(self.syntax_ok)
        }

        fn has_module(&self, name: &str) -> Result<bool> {
            Ok(self.present.contains(&name) || self.installed.borrow().iter().any(|p| p == name))
        }

        fn install(&self, name: &str) -> Result<()> {
            self.installed.borrow_mut().push(name.to_string());
            Ok(())
        }
    }

    struct FakeRegistry {
        known: Vec<&'static str>,
    }

    impl PackageRegistry for FakeRegistry {
        fn exists(&self, name: &str) -> Result<bool> {
            Ok(self.known.contains(&name))
        }
    }

    #[test]
    fn scan_collapses_dotted_and_aliased_imports() {
        let source = "import pandas as pd\nimport os.path\nfrom sklearn.linear_model import X\n";
        let packages = scan_imports(source);
        let names: Vec<&str> = packages.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["os", "pandas", "sklearn"]);
    }

    #[test]
    fn scan_handles_comma_lists_and_skips_indented_lines() {
        let source = "import json, sys\n    import hidden\nfrom . import sibling\n";
        let packages = scan_imports(source);
        let names: Vec<&str> = packages.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["json", "sys"]);
    }

    #[test]
    fn scan_of_non_python_text_is_empty() {
        assert!(scan_imports("echo hello\nexit 1\n").is_empty());
    }

    #[test]
    fn scan_ignores_imports_inside_string_literals() {
        let source = "\"\"\"\nimport ghost_pkg\n\"\"\"\nx = 'import os'\nprint(1)\n";
        assert!(scan_imports(source).is_empty());
    }

    #[test]
    fn scan_still_sees_imports_after_a_docstring() {
        let source = "\"\"\"Summarize the data.\"\"\"\nimport pandas\n";
        let packages = scan_imports(source);
        let names: Vec<&str> = packages.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["pandas"]);
    }

    #[test]
    fn syntax_broken_source_defers_imports_to_execution() {
        // The registry knows nothing, so an escalated scan would be fatal;
        // a non-parsing candidate must instead fail at execution time.
        let probe = FakeProbe::rejecting_syntax();
        let registry = FakeRegistry { known: vec![] };

        let verdict =
            reconcile("def f(:\nimport ghost_pkg\n", &probe, &registry).expect("reconcile");
        assert_eq!(verdict, DepsVerdict::Satisfied);
        assert!(probe.installed.borrow().is_empty());
    }

    #[test]
    fn present_modules_require_no_registry_traffic() {
        let probe = FakeProbe::with_present(vec!["json"]);
        let registry = FakeRegistry { known: vec![] };

        let verdict = reconcile("import json\n", &probe, &registry).expect("reconcile");
        assert_eq!(verdict, DepsVerdict::Satisfied);
        assert!(probe.installed.borrow().is_empty());
    }

    #[test]
    fn missing_but_registered_package_installs_exactly_once() {
        let probe = FakeProbe::with_present(vec![]);
        let registry = FakeRegistry {
            known: vec!["pandas"],
        };

        let verdict =
            reconcile("import pandas\nimport pandas\n", &probe, &registry).expect("reconcile");
        assert_eq!(verdict, DepsVerdict::Satisfied);
        assert_eq!(*probe.installed.borrow(), vec!["pandas".to_string()]);
    }

    #[test]
    fn unregistered_package_is_rejected() {
        let probe = FakeProbe::with_present(vec![]);
        let registry = FakeRegistry { known: vec![] };

        let verdict = reconcile("import totally_made_up\n", &probe, &registry).expect("reconcile");
        assert_eq!(
            verdict,
            DepsVerdict::Rejected {
                package: "totally_made_up".to_string()
            }
        );
        assert!(probe.installed.borrow().is_empty());
    }
}
