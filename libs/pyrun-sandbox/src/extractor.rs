/// Result Extractor - Recovers Test Verdicts from Raw Output
///
/// **Core Responsibility:**
/// Find the marker-delimited JSON block in combined process output and decode
/// it into typed `TestResult`s.
///
/// **Critical Properties:**
/// - Knows nothing about Docker or the interpreter
/// - All-or-nothing per block: a well-formed list or an empty one
/// - Never fails the response; decode faults are logged and swallowed

use pyrun_common::protocol::{RESULTS_END_MARKER, RESULTS_START_MARKER};
use pyrun_common::types::TestResult;
use tracing::{debug, warn};

/// Slice strictly between the first start marker and the first end marker after it.
fn results_block(output: &str) -> Option<&str> {
    let start = output.find(RESULTS_START_MARKER)? + RESULTS_START_MARKER.len();
    let end = output[start..].find(RESULTS_END_MARKER)? + start;
    Some(&output[start..end])
}

/// Extract test results from combined stdout + stderr.
pub fn extract(combined_output: &str) -> Vec<TestResult> {
    let Some(block) = results_block(combined_output) else {
        debug!("No test result block found in output");
        return Vec::new();
    };

    match serde_json::from_str::<Vec<TestResult>>(block.trim()) {
        Ok(results) => results,
        Err(e) => {
            warn!(error = %e, block_len = block.len(), "Failed to decode test result block");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_RESULT: &str = r#"[{"input": "add(2,3)", "expected": "5", "actual": "5", "passed": true, "description": "basic add", "error": null}]"#;

    #[test]
    fn test_extracts_block_surrounded_by_noise() {
        let output = format!("hello\nTEST_RESULTS_START\n{}\nTEST_RESULTS_END\ntrailing stderr", ONE_RESULT);
        let results = extract(&output);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].actual, "5");
        assert!(results[0].passed);
        assert_eq!(results[0].error, None);
    }

    #[test]
    fn test_missing_start_marker() {
        let output = format!("{}\nTEST_RESULTS_END", ONE_RESULT);
        assert!(extract(&output).is_empty());
    }

    #[test]
    fn test_missing_end_marker() {
        let output = format!("TEST_RESULTS_START\n{}", ONE_RESULT);
        assert!(extract(&output).is_empty());
    }

    #[test]
    fn test_end_marker_before_start_marker() {
        let output = format!("TEST_RESULTS_END\n{}\nTEST_RESULTS_START", ONE_RESULT);
        assert!(extract(&output).is_empty());
    }

    #[test]
    fn test_malformed_json_yields_empty() {
        let output = "TEST_RESULTS_START\n[{\"input\": \"x\", \"expected\": \nTEST_RESULTS_END";
        assert!(extract(output).is_empty());
    }

    #[test]
    fn test_wrong_shape_yields_empty() {
        let output = "TEST_RESULTS_START\n{\"not\": \"a list\"}\nTEST_RESULTS_END";
        assert!(extract(output).is_empty());
    }

    #[test]
    fn test_no_partial_recovery() {
        // Second element is missing `passed`
        let output = r#"TEST_RESULTS_START
[{"input": "x", "expected": "1", "actual": "1", "passed": true, "description": ""},
 {"input": "y", "expected": "2", "actual": "2", "description": ""}]
TEST_RESULTS_END"#;
        assert!(extract(output).is_empty());
    }

    #[test]
    fn test_empty_list_is_well_formed() {
        assert!(extract("TEST_RESULTS_START\n[]\nTEST_RESULTS_END").is_empty());
    }

    #[test]
    fn test_uses_first_end_marker_after_start() {
        let output = format!(
            "TEST_RESULTS_START\n{}\nTEST_RESULTS_END\nuser printed TEST_RESULTS_END",
            ONE_RESULT
        );
        assert_eq!(extract(&output).len(), 1);
    }

    #[test]
    fn test_error_and_escapes_survive_decoding() {
        let output = r#"TEST_RESULTS_START
[
  {
    "input": "x",
    "expected": "say \"hi\"\n\\done",
    "actual": "Error",
    "passed": false,
    "description": "quote \" backslash \\ newline \n end",
    "error": "ValueError: bad"
  }
]
TEST_RESULTS_END
"#;
        let results = extract(output);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].expected, "say \"hi\"\n\\done");
        assert_eq!(results[0].description, "quote \" backslash \\ newline \n end");
        assert_eq!(results[0].actual, "Error");
        assert_eq!(results[0].error.as_deref(), Some("ValueError: bad"));
    }
}
