// CLI commands driving the sandbox pipeline locally
use anyhow::{bail, Context, Result};
use pyrun_common::config::{Config, Containment};
use pyrun_common::types::{Action, ExecutionOutcome, ExecutionRequest, TestCase, TestResult};
use pyrun_sandbox::{synthesizer, Executor};
use std::fs;
use std::path::Path;

/// Read a Python source file
fn load_code(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Read a JSON array of test cases
fn load_cases(path: &Path) -> Result<Vec<TestCase>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse test cases in {}", path.display()))
}

/// Build an executor from the environment, optionally forcing host containment
fn build_executor(host: bool) -> Result<Executor> {
    let mut config = Config::from_env()?;
    if host {
        config.containment = Containment::Host;
    }
    Executor::from_config(&config)
}

async fn execute(request: &ExecutionRequest, host: bool) -> Result<ExecutionOutcome> {
    let executor = build_executor(host)?;
    let job = match executor.validate(request) {
        Ok(job) => job,
        Err(e) => bail!("{}", e),
    };
    executor.run(job).await
}

/// Run a file and print its output
pub async fn run_file(path: &Path, host: bool) -> Result<()> {
    let request = ExecutionRequest {
        code: Some(load_code(path)?),
        action: Action::Run,
        test_cases: vec![],
    };

    let outcome = execute(&request, host).await?;
    println!("{}", outcome.output);
    Ok(())
}

/// Run a file against test cases; returns whether every test passed
pub async fn test_file(path: &Path, cases_path: &Path, host: bool, as_json: bool) -> Result<bool> {
    let test_cases = load_cases(cases_path)?;
    let requested = test_cases.len();
    let request = ExecutionRequest {
        code: Some(load_code(path)?),
        action: Action::Test,
        test_cases,
    };

    let outcome = execute(&request, host).await?;
    let results = outcome.results.clone().unwrap_or_default();
    let all_passed = results.len() == requested && results.iter().all(|r| r.passed);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(all_passed);
    }

    if !outcome.output.is_empty() {
        println!("📤 Output:");
        println!("{}", outcome.output);
        println!();
    }

    println!("🧪 Tests:");
    for (idx, result) in results.iter().enumerate() {
        println!("{}", format_result(idx + 1, result));
    }
    println!();
    println!("{}", outcome.summary.as_deref().unwrap_or("no summary"));

    Ok(all_passed)
}

/// Print the synthesized program
pub fn synth_file(path: &Path, cases_path: Option<&Path>) -> Result<()> {
    let code = load_code(path)?;
    let test_cases = match cases_path {
        Some(p) => load_cases(p)?,
        None => vec![],
    };

    print!("{}", synthesizer::synthesize(&code, &test_cases).as_str());
    Ok(())
}

/// One line per verdict, plus the error for failures
fn format_result(number: usize, result: &TestResult) -> String {
    let mark = if result.passed { "✅" } else { "❌" };
    let label = if result.description.is_empty() {
        result.input.as_str()
    } else {
        result.description.as_str()
    };

    let mut line = format!("  {} {}. {}", mark, number, label);
    if !result.passed {
        line.push_str(&format!(
            "\n      expected: {:?}\n      actual:   {:?}",
            result.expected.trim(),
            result.actual.trim()
        ));
        if let Some(error) = &result.error {
            line.push_str(&format!("\n      error:    {}", error));
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrun_common::types::TestInput;
    use std::io::Write;

    fn verdict(passed: bool, description: &str, error: Option<&str>) -> TestResult {
        TestResult {
            input: "add(2,3)".to_string(),
            expected: "5".to_string(),
            actual: if passed { "5" } else { "Error" }.to_string(),
            passed,
            description: description.to_string(),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_load_cases_from_json_array() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": 1, "input": "add(2,3)", "expected": "5", "description": "basic add"}},
                {{"id": 2, "input": "print_output", "expected": "hi", "description": "prints"}}]"#
        )
        .unwrap();

        let cases = load_cases(file.path()).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[1].input, TestInput::PrintOutput);
    }

    #[test]
    fn test_load_cases_reports_path_on_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = load_cases(file.path()).unwrap_err();
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_format_passed_result() {
        assert_eq!(format_result(1, &verdict(true, "basic add", None)), "  ✅ 1. basic add");
    }

    #[test]
    fn test_format_failed_result_includes_error() {
        let line = format_result(2, &verdict(false, "", Some("ValueError: bad")));
        assert!(line.starts_with("  ❌ 2. add(2,3)"));
        assert!(line.contains("expected: \"5\""));
        assert!(line.contains("error:    ValueError: bad"));
    }
}
