/// Program Synthesizer - Wraps User Code in a Test Harness
///
/// **Core Responsibility:**
/// Turn raw user code plus declarative test cases into one self-contained
/// Python program that runs the code, evaluates every test and prints a
/// marker-delimited JSON block with the verdicts.
///
/// **Critical Properties:**
/// - Pure: no I/O, no interpreter, same input → same program text
/// - Every user- or test-controlled string is embedded through `escape`
/// - One evaluation unit per test case; a unit never aborts its siblings
/// - No test cases → the program is the user code, unchanged
///
/// The expression namespace strips builtins. That is a best-effort restriction
/// for test expressions, not a security boundary; containment is the engine's job.

use std::fmt::Write as _;

use pyrun_common::protocol::{RESULTS_END_MARKER, RESULTS_START_MARKER};
use pyrun_common::types::{TestCase, TestInput};

/// Source text ready to be staged and handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableSource {
    text: String,
    harnessed: bool,
}

impl ExecutableSource {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether the text carries the test harness (and so should print a result block).
    pub fn is_harnessed(&self) -> bool {
        self.harnessed
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

const HARNESS_PRELUDE: &str = r#"import io
import json
import sys
import traceback

_PYRUN_FILENAME = "<user_code>"
_pyrun_results = []


def _pyrun_describe(exc):
    message = str(exc)
    name = type(exc).__name__
    return f"{name}: {message}" if message else name


def _pyrun_run_program(namespace):
    exec(compile(_PYRUN_SOURCE, _PYRUN_FILENAME, "exec"), namespace)


_pyrun_namespace = {"__name__": "__main__"}
_pyrun_setup_error = None
try:
    _pyrun_run_program(_pyrun_namespace)
except BaseException as _pyrun_exc:
    _pyrun_setup_error = _pyrun_describe(_pyrun_exc)
    traceback.print_exc()


def _pyrun_clean(text):
    # Lone surrogates would make the whole JSON block undecodable
    if text is None:
        return None
    return text.encode("utf-8", "backslashreplace").decode("utf-8")


def _pyrun_record(test_input, expected, description, actual, error):
    if error is None:
        passed = actual.strip() == expected.strip()
    else:
        actual = "Error"
        passed = False
    _pyrun_results.append({
        "input": test_input,
        "expected": expected,
        "actual": _pyrun_clean(actual),
        "passed": passed,
        "description": description,
        "error": _pyrun_clean(error),
    })


def _pyrun_evaluate(expression):
    if _pyrun_setup_error is not None:
        return None, _pyrun_setup_error
    try:
        return str(eval(expression, {"__builtins__": {}}, _pyrun_namespace)), None
    except BaseException as exc:
        return None, _pyrun_describe(exc)


def _pyrun_capture():
    buffer = io.StringIO()
    saved = sys.stdout
    sys.stdout = buffer
    try:
        _pyrun_run_program({"__name__": "__main__"})
    except BaseException as exc:
        return None, _pyrun_describe(exc)
    finally:
        sys.stdout = saved
    return buffer.getvalue().strip(), None


def _pyrun_unit(test_input, expected, description, capture):
    try:
        if capture:
            actual, error = _pyrun_capture()
        else:
            actual, error = _pyrun_evaluate(test_input)
    except BaseException as exc:
        actual, error = None, _pyrun_describe(exc)
    _pyrun_record(test_input, expected, description, actual, error)


"#;

/// Build the executable program for one request.
pub fn synthesize(user_code: &str, test_cases: &[TestCase]) -> ExecutableSource {
    if test_cases.is_empty() {
        return ExecutableSource {
            text: user_code.to_string(),
            harnessed: false,
        };
    }

    let mut text = String::with_capacity(HARNESS_PRELUDE.len() + user_code.len() * 2 + 512);
    let _ = writeln!(text, "_PYRUN_SOURCE = {}", escape(user_code));
    text.push_str(HARNESS_PRELUDE);

    for case in test_cases {
        text.push_str(&evaluation_unit(case));
        text.push('\n');
    }

    text.push_str(&results_epilogue());

    ExecutableSource {
        text,
        harnessed: true,
    }
}

/// One line of Python evaluating a single test case.
fn evaluation_unit(case: &TestCase) -> String {
    let capture = match case.input {
        TestInput::PrintOutput => "True",
        TestInput::Expression(_) => "False",
    };
    format!(
        "_pyrun_unit({}, {}, {}, {})",
        escape(case.input.as_str()),
        escape(&case.expected),
        escape(&case.description),
        capture
    )
}

/// Emits the result block on the interpreter's original stdout so user code
/// that rebinds `sys.stdout` cannot swallow it.
fn results_epilogue() -> String {
    format!(
        r#"
try:
    sys.stdout.flush()
except BaseException:
    pass
_pyrun_stream = sys.__stdout__ if sys.__stdout__ is not None else sys.stdout
_pyrun_stream.write("\n{start}\n")
_pyrun_stream.write(json.dumps(_pyrun_results, indent=2))
_pyrun_stream.write("\n{end}\n")
_pyrun_stream.flush()
"#,
        start = RESULTS_START_MARKER,
        end = RESULTS_END_MARKER
    )
}

/// Render `text` as a double-quoted Python string literal.
///
/// Grammar of the produced literal:
/// - `\` → `\\`, `"` → `\"`
/// - LF → `\n`, CR → `\r`, TAB → `\t`
/// - other C0/C1 controls and DEL → `\xNN`
/// - U+2028, U+2029 → `\uNNNN`
/// - anything else is copied as-is (the program is written as UTF-8)
///
/// The literal never spans a line, so embedding it cannot change the
/// structure of the surrounding program.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() && (c as u32) <= 0xff => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            '\u{2028}' | '\u{2029}' => {
                let _ = write!(out, "\\u{:04x}", ch as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
