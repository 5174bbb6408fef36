/// Request Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Validate a request, then run synthesize → execute → extract and map the
/// result onto the response contract.
///
/// **Architecture:**
/// 1. Synthesizer builds the program (synthesizer.rs)
/// 2. Engine runs it under containment (engine.rs)
/// 3. Extractor recovers test verdicts (extractor.rs)
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's job)
/// - How the harness reports (synthesizer's and extractor's job)

use anyhow::Result;
use pyrun_common::config::{Config, Containment, Limits};
use pyrun_common::types::{Action, ExecutionOutcome, ExecutionRequest, TestCase};
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::{Engine, RawResult};
use crate::extractor;
use crate::synthesizer::{self, ExecutableSource};

/// Client input faults. Rejected before anything is staged or launched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Invalid code provided")]
    InvalidCode,
    #[error("Code too large. Maximum size is {max} bytes.")]
    CodeTooLarge { max: usize },
    #[error("Too many test cases. Maximum is {max}.")]
    TooManyTestCases { max: usize },
}

/// A request that passed validation.
#[derive(Debug, Clone, Copy)]
pub struct Job<'a> {
    pub code: &'a str,
    pub action: Action,
    /// Empty for `run`.
    pub test_cases: &'a [TestCase],
}

/// Check a request against the admission limits.
pub fn validate<'a>(request: &'a ExecutionRequest, limits: &Limits) -> Result<Job<'a>, RequestError> {
    let code = match request.code.as_deref() {
        Some(code) if !code.is_empty() => code,
        _ => return Err(RequestError::InvalidCode),
    };

    if code.len() > limits.max_code_bytes {
        return Err(RequestError::CodeTooLarge {
            max: limits.max_code_bytes,
        });
    }

    let test_cases: &[TestCase] = match request.action {
        Action::Run => &[],
        Action::Test => &request.test_cases,
    };

    if test_cases.len() > limits.max_test_cases {
        return Err(RequestError::TooManyTestCases {
            max: limits.max_test_cases,
        });
    }

    Ok(Job {
        code,
        action: request.action,
        test_cases,
    })
}

pub struct Executor {
    engine: Engine,
    limits: Limits,
}

impl Executor {
    pub fn new(engine: Engine, limits: Limits) -> Self {
        Self { engine, limits }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(Engine::from_config(config)?, config.limits.clone()))
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn containment(&self) -> Containment {
        self.engine.containment()
    }

    pub fn validate<'a>(&self, request: &'a ExecutionRequest) -> Result<Job<'a>, RequestError> {
        validate(request, &self.limits)
    }

    /// Run a validated job end to end.
    ///
    /// `Err` means an infrastructure fault; anything the user program does is
    /// reported inside the returned outcome.
    pub async fn run(&self, job: Job<'_>) -> Result<ExecutionOutcome> {
        info!(
            action = %job.action,
            code_bytes = job.code.len(),
            test_cases = job.test_cases.len(),
            "Starting execution"
        );

        let source = synthesizer::synthesize(job.code, job.test_cases);
        let raw = self.engine.execute(&source, &self.limits).await?;

        Ok(finish(&job, &source, &raw))
    }
}

/// Map a raw execution onto the response contract.
pub fn finish(job: &Job<'_>, source: &ExecutableSource, raw: &RawResult) -> ExecutionOutcome {
    let mut output = raw.combined_output();

    if job.action == Action::Run {
        return ExecutionOutcome {
            success: true,
            output: output.trim().to_string(),
            results: None,
            summary: None,
        };
    }

    let requested = job.test_cases.len();
    let mut results = if source.is_harnessed() {
        extractor::extract(&output)
    } else {
        Vec::new()
    };

    if results.len() != requested {
        warn!(
            requested,
            extracted = results.len(),
            fault = ?raw.fault,
            "Test harness did not report every test case"
        );
        results.clear();
        output.push_str(&format!(
            "\n[ERROR] Test harness produced no results (0 of {} tests ran).",
            requested
        ));
    }

    let passed = results.iter().filter(|r| r.passed).count();

    ExecutionOutcome {
        success: true,
        output: output.trim().to_string(),
        results: Some(results),
        summary: Some(format!("{}/{} tests passed", passed, requested)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutionFault;
    use pyrun_common::types::{TestInput, TestResult};

    fn limits() -> Limits {
        Limits {
            timeout_ms: 1000,
            max_code_bytes: 32,
            max_test_cases: 2,
            max_output_bytes: 1024,
        }
    }

    fn case(input: &str, expected: &str) -> TestCase {
        TestCase {
            id: 1,
            input: TestInput::from(input.to_string()),
            expected: expected.to_string(),
            description: "d".to_string(),
        }
    }

    fn request(code: Option<&str>, action: Action, test_cases: Vec<TestCase>) -> ExecutionRequest {
        ExecutionRequest {
            code: code.map(str::to_string),
            action,
            test_cases,
        }
    }

    fn raw(stdout: &str, fault: Option<ExecutionFault>) -> RawResult {
        RawResult {
            stdout: stdout.to_string(),
            stderr: String::new(),
            fault,
            execution_ms: 5,
        }
    }

    fn block(results: &[TestResult]) -> String {
        format!(
            "TEST_RESULTS_START\n{}\nTEST_RESULTS_END\n",
            serde_json::to_string_pretty(results).unwrap()
        )
    }

    fn verdict(passed: bool) -> TestResult {
        TestResult {
            input: "x".to_string(),
            expected: "1".to_string(),
            actual: if passed { "1" } else { "2" }.to_string(),
            passed,
            description: "d".to_string(),
            error: None,
        }
    }

    #[test]
    fn test_missing_code_rejected() {
        let req = request(None, Action::Run, vec![]);
        assert_eq!(validate(&req, &limits()).unwrap_err(), RequestError::InvalidCode);
    }

    #[test]
    fn test_empty_code_rejected() {
        let req = request(Some(""), Action::Run, vec![]);
        assert_eq!(validate(&req, &limits()).unwrap_err(), RequestError::InvalidCode);
    }

    #[test]
    fn test_oversized_code_rejected_with_limit_in_message() {
        let code = "x".repeat(33);
        let req = request(Some(&code), Action::Run, vec![]);
        let err = validate(&req, &limits()).unwrap_err();
        assert_eq!(err, RequestError::CodeTooLarge { max: 32 });
        assert_eq!(err.to_string(), "Code too large. Maximum size is 32 bytes.");
    }

    #[test]
    fn test_code_at_limit_accepted() {
        let code = "x".repeat(32);
        let req = request(Some(&code), Action::Run, vec![]);
        assert!(validate(&req, &limits()).is_ok());
    }

    #[test]
    fn test_too_many_test_cases_rejected() {
        let cases = vec![case("x", "1"), case("x", "1"), case("x", "1")];
        let req = request(Some("x = 1"), Action::Test, cases);
        assert_eq!(
            validate(&req, &limits()).unwrap_err(),
            RequestError::TooManyTestCases { max: 2 }
        );
    }

    #[test]
    fn test_run_ignores_test_cases() {
        let cases = vec![case("x", "1"), case("x", "1"), case("x", "1")];
        let req = request(Some("x = 1"), Action::Run, cases);
        let job = validate(&req, &limits()).unwrap();
        assert!(job.test_cases.is_empty());
    }

    #[test]
    fn test_run_outcome_has_no_results_or_summary() {
        let req = request(Some("print(1+1)"), Action::Run, vec![]);
        let job = validate(&req, &limits()).unwrap();
        let source = synthesizer::synthesize(job.code, job.test_cases);

        let outcome = finish(&job, &source, &raw("2\n", None));
        assert!(outcome.success);
        assert_eq!(outcome.output, "2");
        assert!(outcome.results.is_none());
        assert!(outcome.summary.is_none());
    }

    #[test]
    fn test_run_outcome_reports_crash() {
        let req = request(Some("raise ValueError('bad')"), Action::Run, vec![]);
        let job = validate(&req, &limits()).unwrap();
        let source = synthesizer::synthesize(job.code, job.test_cases);

        let outcome = finish(
            &job,
            &source,
            &raw("", Some(ExecutionFault::NonZeroExit { code: 1 })),
        );
        assert!(outcome.success);
        assert_eq!(outcome.output, "[ERROR] Execution failed: exit code 1");
    }

    #[test]
    fn test_test_outcome_counts_passed() {
        let req = request(Some("x = 1"), Action::Test, vec![case("x", "1"), case("x", "1")]);
        let job = validate(&req, &limits()).unwrap();
        let source = synthesizer::synthesize(job.code, job.test_cases);
        let stdout = block(&[verdict(true), verdict(false)]);

        let outcome = finish(&job, &source, &raw(&stdout, None));
        assert_eq!(outcome.results.as_ref().unwrap().len(), 2);
        assert_eq!(outcome.summary.as_deref(), Some("1/2 tests passed"));
        assert!(!outcome.output.contains("[ERROR]"));
    }

    #[test]
    fn test_timeout_reports_zero_tests_ran() {
        let req = request(Some("while True: pass"), Action::Test, vec![case("x", "1")]);
        let job = validate(&req, &limits()).unwrap();
        let source = synthesizer::synthesize(job.code, job.test_cases);

        let outcome = finish(
            &job,
            &source,
            &raw("", Some(ExecutionFault::Timeout { timeout_ms: 1000 })),
        );
        assert!(outcome.success);
        assert!(outcome.output.contains("Execution timeout"));
        assert!(outcome.output.ends_with("(0 of 1 tests ran)."));
        assert_eq!(outcome.results, Some(vec![]));
        assert_eq!(outcome.summary.as_deref(), Some("0/1 tests passed"));
    }

    #[test]
    fn test_result_count_mismatch_is_discarded() {
        let req = request(Some("x = 1"), Action::Test, vec![case("x", "1"), case("x", "1")]);
        let job = validate(&req, &limits()).unwrap();
        let source = synthesizer::synthesize(job.code, job.test_cases);
        let stdout = block(&[verdict(true)]);

        let outcome = finish(&job, &source, &raw(&stdout, None));
        assert_eq!(outcome.results, Some(vec![]));
        assert_eq!(outcome.summary.as_deref(), Some("0/2 tests passed"));
    }

    #[test]
    fn test_test_action_without_cases() {
        let req = request(Some("print('hi')"), Action::Test, vec![]);
        let job = validate(&req, &limits()).unwrap();
        let source = synthesizer::synthesize(job.code, job.test_cases);
        assert!(!source.is_harnessed());

        let outcome = finish(&job, &source, &raw("hi\n", None));
        assert_eq!(outcome.output, "hi");
        assert_eq!(outcome.results, Some(vec![]));
        assert_eq!(outcome.summary.as_deref(), Some("0/0 tests passed"));
    }
}
