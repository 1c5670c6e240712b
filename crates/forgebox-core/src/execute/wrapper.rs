//! Rendering of a validated script into the file handed to the interpreter.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::script::Script;

/// Which wrapper a [`ProcessExecutor`](super::ProcessExecutor) renders with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapperKind {
    /// Marker-emitting Python harness.
    #[default]
    Python,
    /// Script text written unchanged.
    Passthrough,
}

/// Turns a script into the program text that is actually executed.
pub trait ScriptWrapper: Send + Sync {
    /// Render the runnable program for `script`.
    fn render(&self, script: &Script) -> Result<String>;

    /// Extension of the temp file the program is written to.
    fn file_suffix(&self) -> &str;
}

impl WrapperKind {
    pub fn build(self) -> Box<dyn ScriptWrapper> {
        match self {
            WrapperKind::Python => Box::new(PythonWrapper::new()),
            WrapperKind::Passthrough => Box::new(PassthroughWrapper::new(".txt")),
        }
    }
}

const PYTHON_TEMPLATE: &str = r#"import json as __forgebox_json
import sys as __forgebox_sys
import traceback as __forgebox_traceback

__forgebox_context = __forgebox_json.loads({{FORGEBOX_CONTEXT}})
__forgebox_source = {{FORGEBOX_SOURCE}}

try:
    import FreeCAD as __forgebox_app
except ImportError:
    __forgebox_app = None


def __forgebox_object_names():
    if __forgebox_app is None or __forgebox_app.ActiveDocument is None:
        return set()
    return set(obj.Name for obj in __forgebox_app.ActiveDocument.Objects)


__forgebox_before = __forgebox_object_names()
__forgebox_namespace = {"__name__": "__main__", "__context__": __forgebox_context}

try:
    exec(compile(__forgebox_source, "<script>", "exec"), __forgebox_namespace)
except BaseException as exc:
    print("ERROR: %s: %s" % (type(exc).__name__, exc), flush=True)
    __forgebox_traceback.print_exc()
    __forgebox_sys.exit(1)

if __forgebox_app is not None and __forgebox_app.ActiveDocument is not None:
    try:
        __forgebox_app.ActiveDocument.recompute()
    except Exception as exc:
        print("ERROR: Recompute failed: %s" % exc, flush=True)
        __forgebox_sys.exit(1)

for __forgebox_name in sorted(__forgebox_object_names() - __forgebox_before):
    print("ENTITY_CREATED: %s" % __forgebox_name)

print("EXECUTION_SUCCESS", flush=True)
"#;

/// Wraps a script in a Python harness that emits the output markers.
///
/// The script text and its context are embedded as string literals and run
/// with `exec(compile(...))` in a fresh namespace where the context is
/// available as `__context__`. After the script the active CAD document is
/// recomputed when a host module is importable.
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonWrapper;

impl PythonWrapper {
    pub fn new() -> Self {
        PythonWrapper
    }
}

impl ScriptWrapper for PythonWrapper {
    fn render(&self, script: &Script) -> Result<String> {
        // A JSON string literal is also a valid Python string literal.
        let context = serde_json::to_string(&script.context_json())?;
        let source = serde_json::to_string(script.source())?;
        Ok(substitute(
            PYTHON_TEMPLATE,
            &[("FORGEBOX_CONTEXT", &context), ("FORGEBOX_SOURCE", &source)],
        ))
    }

    fn file_suffix(&self) -> &str {
        ".py"
    }
}

/// Writes the script unchanged, for non-Python interpreters.
#[derive(Debug, Clone)]
pub struct PassthroughWrapper {
    suffix: String,
}

impl PassthroughWrapper {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl ScriptWrapper for PassthroughWrapper {
    fn render(&self, script: &Script) -> Result<String> {
        Ok(script.source().to_string())
    }

    fn file_suffix(&self) -> &str {
        &self.suffix
    }
}

/// Replace `{{KEY}}` placeholders in one pass.
///
/// Substituted values are never rescanned, so placeholder-looking text
/// inside a script stays literal. Unknown placeholders are kept verbatim.
fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some((before, after)) = rest.split_once("{{") {
        out.push_str(before);
        match after.split_once("}}") {
            Some((key, tail)) => {
                match values.iter().find(|(name, _)| *name == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(key);
                        out.push_str("}}");
                    }
                }
                rest = tail;
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_substitute_is_single_pass() {
        let rendered = substitute(
            "a={{A}} b={{B}} c={{C}}",
            &[("A", "{{B}}"), ("B", "2")],
        );
        assert_eq!(rendered, "a={{B}} b=2 c={{C}}");
    }

    #[test]
    fn test_substitute_unclosed_braces() {
        assert_eq!(substitute("x = {{ 1", &[]), "x = {{ 1");
    }

    #[test]
    fn test_python_wrapper_embeds_script_as_literal() {
        let mut context = crate::script::ScriptContext::new();
        context.insert("width".to_string(), json!(10));
        let script = Script::with_context("print(\"hi\")\n# {{FORGEBOX_SOURCE}}\n", context);

        let rendered = PythonWrapper::new().render(&script).unwrap();

        assert!(rendered.contains(r#"__forgebox_source = "print(\"hi\")\n# {{FORGEBOX_SOURCE}}\n""#));
        assert!(rendered.contains(r#"__forgebox_json.loads("{\"width\":10}")"#));
        assert!(rendered.contains("exec(compile(__forgebox_source"));
        assert!(rendered.trim_end().ends_with("print(\"EXECUTION_SUCCESS\", flush=True)"));
        assert!(!rendered.contains("{{FORGEBOX_CONTEXT}}"));
    }

    #[test]
    fn test_python_wrapper_reports_recompute_failures() {
        let rendered = PythonWrapper::new().render(&Script::new("x = 1")).unwrap();
        assert!(rendered.contains("ERROR: Recompute failed: %s"));
        assert!(rendered.contains("ENTITY_CREATED: %s"));
        assert_eq!(PythonWrapper::new().file_suffix(), ".py");
    }

    #[test]
    fn test_passthrough_wrapper() {
        let wrapper = PassthroughWrapper::new(".sh");
        let script = Script::new("echo {{FORGEBOX_SOURCE}}");
        assert_eq!(wrapper.render(&script).unwrap(), "echo {{FORGEBOX_SOURCE}}");
        assert_eq!(wrapper.file_suffix(), ".sh");
    }

    #[test]
    fn test_wrapper_kind_builds_matching_wrapper() {
        assert_eq!(WrapperKind::default(), WrapperKind::Python);
        assert_eq!(WrapperKind::Python.build().file_suffix(), ".py");
        assert_eq!(WrapperKind::Passthrough.build().file_suffix(), ".txt");
    }
}
