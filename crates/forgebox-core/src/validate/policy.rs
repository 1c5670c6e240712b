//! Allow/block policy tables.
//!
//! A [`Policy`] is plain data: a map from dotted names to a [`Decision`],
//! plus a mode that says how unknown symbols are treated. Lookups are
//! longest-prefix, so an entry for `FreeCAD` covers `FreeCAD.Vector`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::PolicyConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    Blocked,
    Unknown,
}

/// How symbols absent from the table are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    /// Unknown symbols are errors.
    #[default]
    Strict,
    /// Unknown symbols are warnings.
    Permissive,
}

/// CAD host modules scripts are expected to use.
pub const CAD_MODULES: &[&str] = &[
    "FreeCAD",
    "App",
    "Part",
    "Sketcher",
    "Draft",
    "Mesh",
    "PartDesign",
    "Import",
];

pub const SAFE_STDLIB_MODULES: &[&str] = &[
    "math",
    "cmath",
    "random",
    "json",
    "itertools",
    "functools",
    "collections",
    "decimal",
    "fractions",
    "statistics",
    "dataclasses",
    "typing",
    "enum",
    "copy",
    "re",
    "string",
    "operator",
];

pub const SAFE_BUILTINS: &[&str] = &[
    "print", "len", "range", "enumerate", "zip", "min", "max", "abs", "round", "sum", "sorted",
    "reversed", "list", "dict", "tuple", "set", "frozenset", "str", "int", "float", "bool",
    "complex", "isinstance", "issubclass", "map", "filter", "any", "all", "divmod", "pow", "hash",
    "id", "iter", "next", "repr", "format", "chr", "ord", "hex", "oct", "bin", "slice",
    "property", "staticmethod", "classmethod", "super", "object", "hasattr", "callable", "type",
    "Exception", "BaseException", "ValueError", "TypeError", "KeyError", "IndexError",
    "AttributeError", "RuntimeError", "ZeroDivisionError", "ArithmeticError", "AssertionError",
    "LookupError", "NotImplementedError", "StopIteration", "OverflowError",
];

pub const SAFE_DUNDERS: &[&str] = &[
    "__name__", "__init__", "__doc__", "__len__", "__iter__", "__next__", "__repr__", "__str__",
    "__eq__", "__lt__", "__hash__", "__enter__", "__exit__", "__main__", "__context__",
];

pub const BLOCKED_BUILTINS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "open",
    "input",
    "__import__",
    "globals",
    "locals",
    "vars",
    "getattr",
    "setattr",
    "delattr",
    "dir",
    "breakpoint",
    "exit",
    "quit",
    "help",
    "memoryview",
    "__builtins__",
    "__loader__",
    "__spec__",
];

pub const BLOCKED_MODULES: &[&str] = &[
    "os", "sys", "subprocess", "shutil", "socket", "importlib", "ctypes", "pickle", "marshal",
    "shelve", "builtins", "pty", "posix", "nt", "multiprocessing", "threading", "_thread",
    "signal", "urllib", "http", "ftplib", "smtplib", "telnetlib", "requests", "pathlib",
    "tempfile", "io", "code", "codeop", "inspect", "gc", "resource", "fcntl", "mmap",
    "sysconfig", "platform", "runpy", "zipimport", "asyncio", "select", "selectors", "ssl",
    "webbrowser", "glob", "fileinput",
];

pub const BLOCKED_ATTRIBUTES: &[&str] = &[
    "system",
    "popen",
    "spawnl",
    "spawnle",
    "spawnlp",
    "spawnlpe",
    "spawnv",
    "spawnve",
    "spawnvp",
    "spawnvpe",
    "posix_spawn",
    "posix_spawnp",
    "execl",
    "execle",
    "execlp",
    "execlpe",
    "execv",
    "execve",
    "execvp",
    "execvpe",
    "fork",
    "forkpty",
    "setsid",
    "setpgid",
    "putenv",
    "unsetenv",
    "kill",
    "killpg",
    "remove",
    "unlink",
    "rmdir",
    "rmtree",
    "__globals__",
    "__builtins__",
    "__subclasses__",
    "__bases__",
    "__base__",
    "__mro__",
    "__class__",
    "__dict__",
    "__code__",
    "__closure__",
    "__func__",
    "__self__",
    "__getattribute__",
    "__reduce__",
    "__reduce_ex__",
    "__loader__",
    "__spec__",
    "__import__",
    "f_globals",
    "f_locals",
    "f_builtins",
    "f_back",
    "gi_frame",
    "gi_code",
    "cr_frame",
    "tb_frame",
    "co_code",
    "func_globals",
];

/// Symbols still allowed when scripts run in the shared host process.
pub fn default_reduced_trust_allow() -> Vec<String> {
    ["FreeCAD", "App", "Part", "Sketcher", "math"]
        .iter()
        .chain(SAFE_BUILTINS)
        .chain(SAFE_DUNDERS)
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    mode: PolicyMode,
    entries: BTreeMap<String, Decision>,
    block_dunder_attributes: bool,
    block_private_attributes: bool,
}

impl Default for Policy {
    fn default() -> Self {
        let mut policy = Self::empty(PolicyMode::Strict);
        for name in CAD_MODULES
            .iter()
            .chain(SAFE_STDLIB_MODULES)
            .chain(SAFE_BUILTINS)
            .chain(SAFE_DUNDERS)
        {
            policy.insert_allowed(name);
        }
        for name in BLOCKED_BUILTINS
            .iter()
            .chain(BLOCKED_MODULES)
            .chain(BLOCKED_ATTRIBUTES)
        {
            policy.insert_blocked(name);
        }
        policy
    }
}

impl Policy {
    /// A policy with no entries.
    pub fn empty(mode: PolicyMode) -> Self {
        Self {
            mode,
            entries: BTreeMap::new(),
            block_dunder_attributes: true,
            block_private_attributes: true,
        }
    }

    /// Build a policy from configuration, validating every entry.
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        let mut policy = if config.extend_defaults {
            Self::default()
        } else {
            Self::empty(config.mode)
        };
        policy.mode = config.mode;
        policy.block_dunder_attributes = config.block_dunder_attributes;
        policy.block_private_attributes = config.block_private_attributes;

        for name in &config.allow {
            check_entry(name)?;
            policy.insert_allowed(name);
        }
        for name in &config.block {
            check_entry(name)?;
            policy.insert_blocked(name);
        }
        Ok(policy)
    }

    pub fn allow(mut self, name: &str) -> Self {
        self.insert_allowed(name);
        self
    }

    pub fn block(mut self, name: &str) -> Self {
        self.insert_blocked(name);
        self
    }

    pub fn with_mode(mut self, mode: PolicyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> PolicyMode {
        self.mode
    }

    pub fn entries(&self) -> &BTreeMap<String, Decision> {
        &self.entries
    }

    pub fn blocks_dunder_attributes(&self) -> bool {
        self.block_dunder_attributes
    }

    pub fn blocks_private_attributes(&self) -> bool {
        self.block_private_attributes
    }

    // Block wins over allow regardless of insertion order.
    fn insert_allowed(&mut self, name: &str) {
        self.entries
            .entry(name.to_string())
            .or_insert(Decision::Allowed);
    }

    fn insert_blocked(&mut self, name: &str) {
        self.entries.insert(name.to_string(), Decision::Blocked);
    }

    /// Exact lookup, without prefix matching.
    pub fn lookup(&self, name: &str) -> Decision {
        self.entries.get(name).copied().unwrap_or(Decision::Unknown)
    }

    /// Longest-prefix lookup of a dotted name.
    ///
    /// Returns the decision and the entry that matched.
    pub fn resolve<'a>(&'a self, dotted: &str) -> (Decision, Option<&'a str>) {
        let mut candidate = dotted;
        loop {
            if let Some((key, decision)) = self.entries.get_key_value(candidate) {
                return (*decision, Some(key.as_str()));
            }
            match candidate.rfind('.') {
                Some(dot) => candidate = &candidate[..dot],
                None => return (Decision::Unknown, None),
            }
        }
    }

    /// Decision for a single attribute segment.
    pub fn attribute_decision(&self, attr: &str) -> Decision {
        match self.entries.get(attr) {
            Some(decision) => *decision,
            None if self.block_dunder_attributes && is_dunder(attr) => Decision::Blocked,
            // Allowed modules re-export blocked ones under private names (`random._os`).
            None if self.block_private_attributes && is_private(attr) => Decision::Blocked,
            None => Decision::Unknown,
        }
    }

    /// Narrow the policy to the listed allowed entries and force strict mode.
    ///
    /// Blocked entries are kept. Allowed entries not in `names` are removed.
    pub fn restricted_to(&self, names: &[String]) -> Self {
        let entries = self
            .entries
            .iter()
            .filter(|(name, decision)| {
                **decision != Decision::Allowed || names.iter().any(|n| n == *name)
            })
            .map(|(name, decision)| (name.clone(), *decision))
            .collect();

        Self {
            mode: PolicyMode::Strict,
            entries,
            block_dunder_attributes: self.block_dunder_attributes,
            block_private_attributes: self.block_private_attributes,
        }
    }

    /// Names currently allowed, sorted.
    pub fn allowed_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, decision)| **decision == Decision::Allowed)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

pub fn is_dunder(name: &str) -> bool {
    name.len() > 4
        && name.starts_with("__")
        && name.ends_with("__")
        && name[2..name.len() - 2]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `_name` or `__name`, but not `__name__`.
pub fn is_private(name: &str) -> bool {
    name.starts_with('_') && !is_dunder(name)
}

fn check_entry(name: &str) -> Result<()> {
    let well_formed = !name.is_empty()
        && name.split('.').all(|segment| {
            !segment.is_empty() && segment.chars().all(|c| c.is_alphanumeric() || c == '_')
        });
    if well_formed {
        Ok(())
    } else {
        Err(Error::Policy(format!("invalid policy entry '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_decisions() {
        let policy = Policy::default();
        assert_eq!(policy.lookup("math"), Decision::Allowed);
        assert_eq!(policy.lookup("eval"), Decision::Blocked);
        assert_eq!(policy.lookup("os"), Decision::Blocked);
        assert_eq!(policy.lookup("numpy"), Decision::Unknown);
        assert_eq!(policy.mode(), PolicyMode::Strict);
    }

    #[test]
    fn test_longest_prefix_resolution() {
        let policy = Policy::default().allow("os.path");
        assert_eq!(policy.resolve("os.path.join"), (Decision::Allowed, Some("os.path")));
        assert_eq!(policy.resolve("os.system"), (Decision::Blocked, Some("os")));
        assert_eq!(
            policy.resolve("FreeCAD.Vector"),
            (Decision::Allowed, Some("FreeCAD"))
        );
        assert_eq!(policy.resolve("numpy.array"), (Decision::Unknown, None));
    }

    #[test]
    fn test_block_wins_over_allow() {
        let policy = Policy::empty(PolicyMode::Strict).block("x").allow("x");
        assert_eq!(policy.lookup("x"), Decision::Blocked);

        let policy = Policy::empty(PolicyMode::Strict).allow("x").block("x");
        assert_eq!(policy.lookup("x"), Decision::Blocked);
    }

    #[test]
    fn test_dunder_attributes() {
        let policy = Policy::default();
        assert_eq!(policy.attribute_decision("__init__"), Decision::Allowed);
        assert_eq!(policy.attribute_decision("__globals__"), Decision::Blocked);
        assert_eq!(policy.attribute_decision("__weird__"), Decision::Blocked);
        assert_eq!(policy.attribute_decision("Vector"), Decision::Unknown);

        let mut config = PolicyConfig::default();
        config.block_dunder_attributes = false;
        let relaxed = Policy::from_config(&config).unwrap();
        assert_eq!(relaxed.attribute_decision("__weird__"), Decision::Unknown);
    }

    #[test]
    fn test_private_attributes() {
        let policy = Policy::default();
        assert_eq!(policy.attribute_decision("_os"), Decision::Blocked);
        assert_eq!(policy.attribute_decision("__mangled"), Decision::Blocked);
        assert_eq!(policy.attribute_decision("__init__"), Decision::Allowed);
        assert_eq!(policy.attribute_decision("Shape"), Decision::Unknown);

        let mut config = PolicyConfig::default();
        config.block_private_attributes = false;
        let relaxed = Policy::from_config(&config).unwrap();
        assert_eq!(relaxed.attribute_decision("_os"), Decision::Unknown);
        assert!(!relaxed.restricted_to(&[]).blocks_private_attributes());
    }

    #[test]
    fn test_process_control_attributes_are_blocked() {
        let policy = Policy::default();
        for attr in [
            "execl", "execlp", "execvpe", "spawnlp", "posix_spawn", "posix_spawnp", "setsid",
            "putenv", "forkpty", "killpg",
        ] {
            assert_eq!(policy.attribute_decision(attr), Decision::Blocked, "{attr}");
        }
    }

    #[test]
    fn test_is_private() {
        assert!(is_private("_os"));
        assert!(is_private("__x"));
        assert!(!is_private("__class__"));
        assert!(!is_private("Part"));
    }

    #[test]
    fn test_is_dunder() {
        assert!(is_dunder("__class__"));
        assert!(!is_dunder("____"));
        assert!(!is_dunder("_private"));
        assert!(!is_dunder("__x"));
    }

    #[test]
    fn test_restricted_to() {
        let narrowed = Policy::default()
            .with_mode(PolicyMode::Permissive)
            .restricted_to(&["math".to_string(), "print".to_string()]);
        assert_eq!(narrowed.mode(), PolicyMode::Strict);
        assert_eq!(narrowed.lookup("math"), Decision::Allowed);
        assert_eq!(narrowed.lookup("json"), Decision::Unknown);
        assert_eq!(narrowed.lookup("eval"), Decision::Blocked);
    }

    #[test]
    fn test_from_config_extends_defaults() {
        let mut config = PolicyConfig::default();
        config.allow = vec!["numpy".to_string()];
        config.block = vec!["random".to_string()];
        config.mode = PolicyMode::Permissive;

        let policy = Policy::from_config(&config).unwrap();
        assert_eq!(policy.lookup("numpy"), Decision::Allowed);
        assert_eq!(policy.lookup("random"), Decision::Blocked);
        assert_eq!(policy.lookup("eval"), Decision::Blocked);
        assert_eq!(policy.mode(), PolicyMode::Permissive);
    }

    #[test]
    fn test_from_config_without_defaults() {
        let mut config = PolicyConfig::default();
        config.extend_defaults = false;
        config.allow = vec!["math".to_string()];

        let policy = Policy::from_config(&config).unwrap();
        assert_eq!(policy.entries().len(), 1);
    }

    #[test]
    fn test_invalid_entries_rejected() {
        for bad in ["", "os.", ".os", "a b", "a..b"] {
            let mut config = PolicyConfig::default();
            config.block = vec![bad.to_string()];
            assert!(
                matches!(Policy::from_config(&config), Err(Error::Policy(_))),
                "{bad:?}"
            );
        }
    }
}
