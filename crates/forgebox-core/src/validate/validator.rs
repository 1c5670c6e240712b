//! Static policy checks over a parsed script.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::policy::{Decision, Policy, PolicyMode, is_dunder};
use super::syntax::{self, Expr, Stmt, Visit, walk_expr, walk_module, walk_stmt};
use crate::result::{ValidationResult, ValidationResultBuilder};
use crate::script::Script;

/// Checks scripts against a [`Policy`] without executing them.
///
/// Validation is deterministic: the same script and policy always produce
/// equal results.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    policy: Policy,
}

impl Validator {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn validate(&self, script: &Script) -> ValidationResult {
        let result = self.validate_source(script.source());
        debug!(
            script_id = %script.id(),
            valid = result.is_valid(),
            errors = result.errors().len(),
            warnings = result.warnings().len(),
            "validated script"
        );
        result
    }

    pub fn validate_source(&self, source: &str) -> ValidationResult {
        let module = match syntax::parse(source) {
            Ok(module) => module,
            Err(err) => return ValidationResult::rejected(format!("SyntaxError: {err}")),
        };

        let mut scope = Scope::default();
        walk_module(&mut scope, &module);

        let mut checker = Checker {
            policy: &self.policy,
            scope: &scope,
            findings: ValidationResult::builder(),
        };
        walk_module(&mut checker, &module);
        checker.findings.build()
    }
}

/// Names a script binds anywhere, plus its import aliases.
#[derive(Debug, Default)]
struct Scope {
    bindings: HashSet<String>,
    /// Local name to fully qualified name.
    aliases: HashMap<String, String>,
    star_modules: Vec<String>,
}

impl Visit for Scope {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Import { names, .. } => {
                for alias in names {
                    match &alias.asname {
                        Some(local) => {
                            self.aliases.insert(local.clone(), alias.name.clone());
                        }
                        None => {
                            let root = alias.name.split('.').next().unwrap_or(&alias.name);
                            self.aliases.insert(root.to_string(), root.to_string());
                        }
                    }
                }
            }
            Stmt::ImportFrom {
                module: Some(module),
                level: 0,
                names,
                ..
            } => {
                for alias in names {
                    if alias.name == "*" {
                        self.star_modules.push(module.clone());
                        continue;
                    }
                    let local = alias.asname.as_ref().unwrap_or(&alias.name);
                    self.aliases
                        .insert(local.clone(), format!("{module}.{}", alias.name));
                }
            }
            Stmt::Def { name, params, .. } => {
                self.bindings.insert(name.clone());
                self.bindings.extend(params.iter().cloned());
            }
            Stmt::Simple { bindings, .. } => {
                self.bindings.extend(bindings.iter().cloned());
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }
}

struct Checker<'a> {
    policy: &'a Policy,
    scope: &'a Scope,
    findings: ValidationResultBuilder,
}

impl Checker<'_> {
    fn report_unknown(&mut self, message: String) {
        match self.policy.mode() {
            PolicyMode::Strict => self.findings.push_error(message),
            PolicyMode::Permissive => self.findings.push_warning(message),
        }
    }

    fn block(&mut self, message: String, symbol: &str) {
        self.findings.push_error(message);
        self.findings.record_blocked(symbol);
    }

    /// Returns the decision for the module itself.
    fn check_module(&mut self, module: &str, line: usize) -> Decision {
        let policy = self.policy;
        let (decision, key) = policy.resolve(module);
        if decision != Decision::Blocked {
            let hidden = module
                .split('.')
                .skip(1)
                .find(|segment| policy.attribute_decision(segment) == Decision::Blocked);
            if let Some(segment) = hidden {
                self.block(format!("line {line}: blocked import '{module}'"), segment);
                return Decision::Blocked;
            }
        }
        match decision {
            Decision::Blocked => {
                self.block(
                    format!("line {line}: blocked import '{module}'"),
                    key.unwrap_or(module),
                );
            }
            Decision::Allowed => {
                if let Some(key) = key {
                    self.findings.record_allowed(key);
                }
            }
            Decision::Unknown => {
                self.report_unknown(format!("line {line}: unknown module '{module}'"));
            }
        }
        decision
    }

    fn check_from_import(&mut self, module: &str, names: &[syntax::Alias], line: usize) {
        if self.check_module(module, line) == Decision::Blocked {
            return;
        }

        let policy = self.policy;
        for alias in names.iter().filter(|alias| alias.name != "*") {
            let qualified = format!("{module}.{}", alias.name);
            let blocked_symbol = match policy.resolve(&qualified) {
                (Decision::Blocked, key) => Some(key.unwrap_or(&qualified)),
                _ if policy.attribute_decision(&alias.name) == Decision::Blocked => {
                    Some(alias.name.as_str())
                }
                (Decision::Allowed, Some(key)) => {
                    self.findings.record_allowed(key);
                    None
                }
                _ => None,
            };
            if let Some(symbol) = blocked_symbol {
                self.block(format!("line {line}: blocked import '{qualified}'"), symbol);
            }
        }
    }

    fn check_name(&mut self, id: &str, line: usize, called: bool) {
        let policy = self.policy;
        let scope = self.scope;

        match policy.lookup(id) {
            Decision::Blocked => {
                let what = if called { "call" } else { "name" };
                self.block(format!("line {line}: blocked {what} '{id}'"), id);
            }
            Decision::Allowed => self.findings.record_allowed(id),
            Decision::Unknown => {
                if let Some(target) = scope.aliases.get(id) {
                    if let (Decision::Allowed, Some(key)) = policy.resolve(target) {
                        self.findings.record_allowed(key);
                    }
                    return;
                }
                if !called || scope.bindings.contains(id) {
                    return;
                }
                let from_star = scope.star_modules.iter().find_map(|module| {
                    match policy.resolve(&format!("{module}.{id}")) {
                        (Decision::Allowed, Some(key)) => Some(key),
                        _ => None,
                    }
                });
                match from_star {
                    Some(key) => self.findings.record_allowed(key),
                    None => self.report_unknown(format!("line {line}: unknown call '{id}'")),
                }
            }
        }
    }

    fn check_attribute_chain(&mut self, expr: &Expr, called: bool) {
        let policy = self.policy;
        let scope = self.scope;

        let mut attrs = Vec::new();
        let mut base = expr;
        while let Expr::Attribute { value, attr, line } = base {
            attrs.push((attr.as_str(), *line));
            base = value;
        }
        attrs.reverse();

        for &(attr, line) in &attrs {
            if policy.attribute_decision(attr) == Decision::Blocked {
                self.block(format!("line {line}: blocked attribute '{attr}'"), attr);
            }
        }

        let Expr::Name { id, line } = base else {
            self.visit_expr(base);
            return;
        };
        self.check_name(id, *line, false);

        let Some(target) = scope.aliases.get(id) else {
            return;
        };
        let path: Vec<&str> = attrs.iter().map(|(attr, _)| *attr).collect();
        let qualified = format!("{target}.{}", path.join("."));
        match policy.resolve(&qualified) {
            (Decision::Blocked, key) => {
                let what = if called { "call" } else { "attribute" };
                self.block(
                    format!("line {}: blocked {what} '{qualified}'", expr.line()),
                    key.unwrap_or(&qualified),
                );
            }
            (Decision::Allowed, Some(key)) => self.findings.record_allowed(key),
            // Members of an allowed-or-unknown module are not individually listed.
            _ => {}
        }
    }

    fn check_string(&mut self, text: &str, line: usize) {
        let policy = self.policy;
        for word in text.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
            if is_dunder(word) && policy.attribute_decision(word) == Decision::Blocked {
                self.block(
                    format!("line {line}: blocked symbol '{word}' in string literal"),
                    word,
                );
            }
        }
    }
}

impl Visit for Checker<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Import { names, line } => {
                for alias in names {
                    self.check_module(&alias.name, *line);
                }
            }
            Stmt::ImportFrom {
                module,
                level,
                names,
                line,
            } => match module {
                Some(module) if *level == 0 => self.check_from_import(module, names, *line),
                _ => {
                    let dots = ".".repeat(*level);
                    let target = module.as_deref().unwrap_or("");
                    self.findings.push_error(format!(
                        "line {line}: relative import '{dots}{target}' is not allowed"
                    ));
                }
            },
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Name { id, line } => self.check_name(id, *line, false),
            Expr::Attribute { .. } => self.check_attribute_chain(expr, false),
            Expr::Call { func, args, .. } => {
                match func.as_ref() {
                    Expr::Name { id, line } => self.check_name(id, *line, true),
                    Expr::Attribute { .. } => self.check_attribute_chain(func, true),
                    other => self.visit_expr(other),
                }
                for arg in args {
                    self.visit_expr(arg);
                }
            }
            Expr::Literal {
                value: Some(text),
                line,
            } => self.check_string(text, *line),
            Expr::FormattedString {
                literal, line, ..
            } => {
                self.check_string(literal, *line);
                walk_expr(self, expr);
            }
            _ => walk_expr(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(source: &str) -> ValidationResult {
        Validator::default().validate_source(source)
    }

    fn permissive(source: &str) -> ValidationResult {
        Validator::new(Policy::default().with_mode(PolicyMode::Permissive)).validate_source(source)
    }

    fn assert_error(result: &ValidationResult, expected: &str) {
        assert!(
            result.errors().iter().any(|e| e == expected),
            "expected {expected:?} in {:?}",
            result.errors()
        );
    }

    #[test]
    fn test_cad_script_is_valid() {
        let result = validate(
            r#"
import FreeCAD as App
import Part
import math

doc = App.newDocument("Bracket")
width = __context__.get("width", 10)
box = Part.makeBox(width, 20, 5)
for i in range(3):
    print(math.sqrt(i), len(doc.Objects))
"#,
        );
        assert!(result.is_valid(), "{:?}", result.errors());
        assert!(result.warnings().is_empty());
    }

    #[test]
    fn test_allowed_symbols_are_recorded() {
        let result = validate(
            "import FreeCAD as App\nimport Part\nbox = Part.makeBox(1, 2, 3)\nv = App.Vector(0, 0, 1)\nprint(abs(-1))\n",
        );
        assert!(result.is_valid(), "{:?}", result.errors());
        assert_eq!(
            result.allowed_symbols(),
            ["App", "FreeCAD", "Part", "abs", "print"]
        );
        assert!(result.blocked_symbols().is_empty());
    }

    #[test]
    fn test_blocked_imports() {
        let result = validate("import os\nimport subprocess as sp\nfrom shutil import rmtree\n");
        assert!(!result.is_valid());
        assert_error(&result, "line 1: blocked import 'os'");
        assert_error(&result, "line 2: blocked import 'subprocess'");
        assert_error(&result, "line 3: blocked import 'shutil'");
        assert_eq!(result.blocked_symbols(), ["os", "shutil", "subprocess"]);
    }

    #[test]
    fn test_blocked_member_of_allowed_module() {
        let result = validate("from FreeCAD import __builtins__\n");
        assert_error(&result, "line 1: blocked import 'FreeCAD.__builtins__'");
    }

    #[test]
    fn test_blocked_calls_and_references() {
        let result = validate("eval('1')\nf = exec\n");
        assert_error(&result, "line 1: blocked call 'eval'");
        assert_error(&result, "line 2: blocked name 'exec'");
    }

    #[test]
    fn test_rebinding_does_not_launder_blocked_names() {
        let result = validate("eval('1')\neval = print\n");
        assert_error(&result, "line 1: blocked call 'eval'");
    }

    #[test]
    fn test_blocked_attributes() {
        let result = validate("x = ().__class__.__bases__[0].__subclasses__()\n");
        assert_error(&result, "line 1: blocked attribute '__class__'");
        assert_error(&result, "line 1: blocked attribute '__bases__'");
        assert_error(&result, "line 1: blocked attribute '__subclasses__'");
    }

    #[test]
    fn test_attribute_named_like_dangerous_function() {
        let result = validate("import FreeCAD\nFreeCAD.system('ls')\n");
        assert_error(&result, "line 2: blocked attribute 'system'");
    }

    #[test]
    fn test_module_reached_through_allowed_module() {
        let result = validate("import random\nrandom._os.system('id')\n");
        assert_error(&result, "line 2: blocked attribute 'system'");
    }

    #[test]
    fn test_private_handles_of_allowed_modules() {
        let result = validate("import random\nrandom._os.execl('/bin/sh', 'sh', '-c', 'id')\n");
        assert!(!result.is_valid());
        assert_error(&result, "line 2: blocked attribute '_os'");
        assert_error(&result, "line 2: blocked attribute 'execl'");

        let result = validate("import random\nrandom._os.posix_spawnp('sh', ['sh'], {})\n");
        assert_error(&result, "line 2: blocked attribute 'posix_spawnp'");

        let result = validate("import collections\ncollections._sys.modules['os'].execlp('sh', 'sh')\n");
        assert_error(&result, "line 2: blocked attribute '_sys'");
        assert_error(&result, "line 2: blocked attribute 'execlp'");
    }

    #[test]
    fn test_private_names_in_imports() {
        let result = validate("from random import _os\n");
        assert_error(&result, "line 1: blocked import 'random._os'");
        assert_eq!(result.blocked_symbols(), ["_os"]);

        let result = validate("import json._private\n");
        assert_error(&result, "line 1: blocked import 'json._private'");

        let result = validate("from random import randint as _r\nprint(_r(1, 6))\n");
        assert!(result.is_valid(), "{:?}", result.errors());
    }

    #[test]
    fn test_private_attributes_can_be_allowed() {
        let mut config = crate::config::PolicyConfig::default();
        config.block_private_attributes = false;
        let validator = Validator::new(Policy::from_config(&config).unwrap());

        let result = validator.validate_source("import math\nx = math._hidden\n");
        assert!(result.is_valid(), "{:?}", result.errors());

        let result = validator.validate_source("import random\nrandom._os.execl('sh')\n");
        assert_error(&result, "line 2: blocked attribute 'execl'");
    }

    #[test]
    fn test_string_literal_dunders() {
        let result = validate("s = '{0.__globals__}'.format(f)\n");
        assert_error(
            &result,
            "line 1: blocked symbol '__globals__' in string literal",
        );

        let result = validate("s = '__glo' 'bals__'\n");
        assert!(!result.is_valid());

        assert!(validate("if __name__ == '__main__':\n    print(1)\n").is_valid());
    }

    #[test]
    fn test_fstring_hidden_calls() {
        let result = validate("s = f\"{eval('1+1')}\"\n");
        assert_error(&result, "line 1: blocked call 'eval'");

        let result = validate("w = 3\ns = f'{1:>{open(p)}}'\n");
        assert_error(&result, "line 2: blocked call 'open'");
    }

    #[test]
    fn test_unknown_symbols_strict_and_permissive() {
        let source = "import numpy\nfrobnicate(1)\n";

        let strict = validate(source);
        assert!(!strict.is_valid());
        assert_error(&strict, "line 1: unknown module 'numpy'");
        assert_error(&strict, "line 2: unknown call 'frobnicate'");

        let lenient = permissive(source);
        assert!(lenient.is_valid());
        assert_eq!(
            lenient.warnings(),
            [
                "line 1: unknown module 'numpy'",
                "line 2: unknown call 'frobnicate'"
            ]
        );
    }

    #[test]
    fn test_local_definitions_are_not_unknown() {
        let result = validate(
            r#"
def helper(n, scale=2):
    return n * scale

class Shape:
    def area(self):
        return helper(self.size)

make = lambda k: helper(k)
values = [helper(v) for v in range(3)]
shape = Shape()
shape.area()
make(1)
"#,
        );
        assert!(result.is_valid(), "{:?}", result.errors());
    }

    #[test]
    fn test_from_imports_resolve_through_aliases() {
        let result = validate("from math import sqrt as root\nfrom math import *\nroot(2)\nfloor(2.5)\n");
        assert!(result.is_valid(), "{:?}", result.errors());
        assert!(result.allowed_symbols().contains(&"math".to_string()));
    }

    #[test]
    fn test_relative_import_rejected() {
        let result = validate("from . import helpers\n");
        assert_eq!(
            result.errors(),
            ["line 1: relative import '.' is not allowed"]
        );
    }

    #[test]
    fn test_syntax_error_is_single_entry() {
        let result = validate("import os\ndef broken(:\n");
        assert!(!result.is_valid());
        assert_eq!(result.errors().len(), 1);
        assert!(result.errors()[0].starts_with("SyntaxError: "));
        assert!(result.allowed_symbols().is_empty());
        assert!(result.blocked_symbols().is_empty());

        let result = validate("x = 'unterminated\n");
        assert_eq!(
            result.errors(),
            ["SyntaxError: unterminated string literal (line 1)"]
        );
    }

    #[test]
    fn test_validation_is_deterministic() {
        let source = "import os\nimport math\neval(os.system)\nfoo()\n";
        assert_eq!(validate(source), validate(source));
    }

    #[test]
    fn test_custom_block_through_alias() {
        let policy = Policy::default().block("FreeCAD.closeDocument");
        let result = Validator::new(policy)
            .validate_source("import FreeCAD as App\nApp.closeDocument('x')\n");
        assert_error(&result, "line 2: blocked call 'FreeCAD.closeDocument'");
    }

    #[test]
    fn test_reduced_trust_policy() {
        let narrowed = Policy::default().restricted_to(&["math".into(), "print".into()]);
        let validator = Validator::new(narrowed);

        assert!(validator.validate_source("import math\nprint(math.pi)\n").is_valid());

        let result = validator.validate_source("import json\nlen([])\n");
        assert_error(&result, "line 1: unknown module 'json'");
        assert_error(&result, "line 2: unknown call 'len'");
    }
}
