/// Output protocol between the synthesized harness and the extractor.
/// Defines only semantics, not runtime logic, so the harness template and the
/// parser never drift.

/// Marker line printed before the JSON result array.
pub const RESULTS_START_MARKER: &str = "TEST_RESULTS_START";
/// Marker line printed after the JSON result array.
pub const RESULTS_END_MARKER: &str = "TEST_RESULTS_END";

/// Prefix for per-run staging directories and container names.
pub const STAGING_PREFIX: &str = "pyrun";

/// File name of the synthesized program inside its staging directory.
pub const PROGRAM_FILE_NAME: &str = "main.py";

/// Mount point of the staging directory inside the container.
pub const CONTAINER_MOUNT: &str = "/sandbox";

/// Staging directory prefix for one run; `tempfile` appends a random suffix.
pub fn staging_prefix(run_id: &uuid::Uuid) -> String {
    format!("{}-{}-", STAGING_PREFIX, run_id)
}

/// Container name for one run.
pub fn container_name(run_id: &uuid::Uuid) -> String {
    format!("{}-{}", STAGING_PREFIX, run_id)
}

/// Path of the program as seen from inside the container.
pub fn container_program_path() -> String {
    format!("{}/{}", CONTAINER_MOUNT, PROGRAM_FILE_NAME)
}
