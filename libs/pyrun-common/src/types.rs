use serde::{Deserialize, Serialize};

/// Reserved `input` value meaning "compare the program's own printed output".
pub const PRINT_OUTPUT_SENTINEL: &str = "print_output";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Run,
    Test,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Run => write!(f, "run"),
            Action::Test => write!(f, "test"),
        }
    }
}

/// What a test case evaluates: an expression against the program's bindings,
/// or the program's own stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TestInput {
    PrintOutput,
    Expression(String),
}

impl From<String> for TestInput {
    fn from(raw: String) -> Self {
        if raw == PRINT_OUTPUT_SENTINEL {
            TestInput::PrintOutput
        } else {
            TestInput::Expression(raw)
        }
    }
}

impl From<TestInput> for String {
    fn from(input: TestInput) -> Self {
        match input {
            TestInput::PrintOutput => PRINT_OUTPUT_SENTINEL.to_string(),
            TestInput::Expression(expr) => expr,
        }
    }
}

impl TestInput {
    pub fn as_str(&self) -> &str {
        match self {
            TestInput::PrintOutput => PRINT_OUTPUT_SENTINEL,
            TestInput::Expression(expr) => expr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub id: i64,
    pub input: TestInput,
    pub expected: String,
    #[serde(default)]
    pub description: String,
}

/// Inbound body of `POST /api/run`.
///
/// `code` stays optional at the serde level so a missing field is reported
/// through validation with the same message as an empty one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub action: Action,
    #[serde(default, rename = "testCases")]
    pub test_cases: Vec<TestCase>,
}

/// Verdict for one test case, as emitted by the harness between the markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub input: String,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<TestResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ExecutionOutcome {
    /// Outcome for requests rejected before anything ran.
    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            results: None,
            summary: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_input_sentinel_roundtrip() {
        let case: TestCase = serde_json::from_value(json!({
            "id": 1,
            "input": "print_output",
            "expected": "hello",
            "description": "prints hello"
        }))
        .unwrap();
        assert_eq!(case.input, TestInput::PrintOutput);

        let back = serde_json::to_value(&case).unwrap();
        assert_eq!(back["input"], "print_output");
    }

    #[test]
    fn test_input_expression() {
        let case: TestCase = serde_json::from_value(json!({
            "input": "add(2, 3)",
            "expected": "5"
        }))
        .unwrap();
        assert_eq!(case.input, TestInput::Expression("add(2, 3)".to_string()));
        assert_eq!(case.description, "");
        assert_eq!(case.id, 0);
    }

    #[test]
    fn test_request_defaults_to_run() {
        let req: ExecutionRequest = serde_json::from_value(json!({ "code": "print(1)" })).unwrap();
        assert_eq!(req.action, Action::Run);
        assert!(req.test_cases.is_empty());
    }

    #[test]
    fn test_request_reads_camel_case_test_cases() {
        let req: ExecutionRequest = serde_json::from_value(json!({
            "code": "x = 1",
            "action": "test",
            "testCases": [{ "id": 7, "input": "x", "expected": "1", "description": "d" }]
        }))
        .unwrap();
        assert_eq!(req.action, Action::Test);
        assert_eq!(req.test_cases.len(), 1);
        assert_eq!(req.test_cases[0].id, 7);
    }

    #[test]
    fn test_result_error_omitted_when_absent() {
        let result = TestResult {
            input: "x".to_string(),
            expected: "1".to_string(),
            actual: "1".to_string(),
            passed: true,
            description: String::new(),
            error: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_result_accepts_null_error() {
        let result: TestResult = serde_json::from_value(json!({
            "input": "x",
            "expected": "1",
            "actual": "1",
            "passed": true,
            "description": "",
            "error": null
        }))
        .unwrap();
        assert_eq!(result.error, None);
    }

    #[test]
    fn test_run_outcome_omits_results_and_summary() {
        let outcome = ExecutionOutcome {
            success: true,
            output: "2".to_string(),
            results: None,
            summary: None,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value, json!({ "success": true, "output": "2" }));
    }
}
