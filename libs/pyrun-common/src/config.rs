// Runtime configuration, read from the environment
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_CODE_BYTES: usize = 100 * 1024;
pub const DEFAULT_MAX_TEST_CASES: usize = 10;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_IMAGE: &str = "python:3.12-alpine";
pub const DEFAULT_MEMORY_MB: u64 = 100;
pub const DEFAULT_CPUS: f64 = 1.0;
pub const DEFAULT_PIDS_LIMIT: i64 = 64;
pub const DEFAULT_HOST_PYTHON: &str = "python3";
pub const DEFAULT_CONTAINER_PYTHON: &str = "python";

/// How a synthesized program is isolated from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    /// Container runtime with memory/CPU ceilings and no network.
    Container,
    /// Interpreter launched directly on the host. Timeout is the only limit.
    Host,
}

impl std::fmt::Display for Containment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Containment::Container => write!(f, "container"),
            Containment::Host => write!(f, "host"),
        }
    }
}

impl FromStr for Containment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "container" | "docker" => Ok(Containment::Container),
            "host" => Ok(Containment::Host),
            other => bail!("Unknown containment strategy '{}' (expected 'container' or 'host')", other),
        }
    }
}

/// Request admission limits.
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    pub timeout_ms: u64,
    pub max_code_bytes: usize,
    pub max_test_cases: usize,
    /// Combined stdout + stderr captured per run; the program is killed past it.
    pub max_output_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_code_bytes: DEFAULT_MAX_CODE_BYTES,
            max_test_cases: DEFAULT_MAX_TEST_CASES,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Resource ceilings applied to each container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerLimits {
    pub image: String,
    pub python: String,
    pub memory_mb: u64,
    pub cpus: f64,
    pub pids_limit: i64,
}

impl ContainerLimits {
    /// Memory ceiling in bytes; `None` when it does not fit the runtime's i64.
    pub fn checked_memory_bytes(&self) -> Option<i64> {
        self.memory_mb
            .checked_mul(1024 * 1024)
            .and_then(|bytes| i64::try_from(bytes).ok())
    }

    pub fn memory_bytes(&self) -> i64 {
        self.checked_memory_bytes().unwrap_or(i64::MAX)
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpus * 1_000_000_000.0) as i64
    }
}

impl Default for ContainerLimits {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            python: DEFAULT_CONTAINER_PYTHON.to_string(),
            memory_mb: DEFAULT_MEMORY_MB,
            cpus: DEFAULT_CPUS,
            pids_limit: DEFAULT_PIDS_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: String,
    pub max_body_bytes: usize,
    pub limits: Limits,
    pub containment: Containment,
    pub container: ContainerLimits,
    pub host_python: String,
    /// Parent of per-run staging directories; system temp dir when unset.
    pub staging_root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            limits: Limits::default(),
            containment: Containment::Container,
            container: ContainerLimits::default(),
            host_python: DEFAULT_HOST_PYTHON.to_string(),
            staging_root: None,
        }
    }
}

impl Config {
    /// Load configuration from `PYRUN_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let containment = match get("PYRUN_CONTAINMENT") {
            Some(raw) => raw.parse().context("Invalid PYRUN_CONTAINMENT")?,
            None => defaults.containment,
        };

        let config = Config {
            bind_addr: get("PYRUN_BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_body_bytes: parse_or(&get, "PYRUN_MAX_BODY_BYTES", defaults.max_body_bytes)?,
            limits: Limits {
                timeout_ms: parse_or(&get, "PYRUN_TIMEOUT_MS", defaults.limits.timeout_ms)?,
                max_code_bytes: parse_or(&get, "PYRUN_MAX_CODE_BYTES", defaults.limits.max_code_bytes)?,
                max_test_cases: parse_or(&get, "PYRUN_MAX_TEST_CASES", defaults.limits.max_test_cases)?,
                max_output_bytes: parse_or(&get, "PYRUN_MAX_OUTPUT_BYTES", defaults.limits.max_output_bytes)?,
            },
            containment,
            container: ContainerLimits {
                image: get("PYRUN_IMAGE").unwrap_or(defaults.container.image),
                python: get("PYRUN_CONTAINER_PYTHON").unwrap_or(defaults.container.python),
                memory_mb: parse_or(&get, "PYRUN_MEMORY_MB", defaults.container.memory_mb)?,
                cpus: parse_or(&get, "PYRUN_CPUS", defaults.container.cpus)?,
                pids_limit: parse_or(&get, "PYRUN_PIDS_LIMIT", defaults.container.pids_limit)?,
            },
            host_python: get("PYRUN_PYTHON").unwrap_or(defaults.host_python),
            staging_root: get("PYRUN_STAGING_DIR").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.limits.timeout_ms == 0 {
            bail!("PYRUN_TIMEOUT_MS must be greater than zero");
        }
        if self.limits.max_code_bytes == 0 {
            bail!("PYRUN_MAX_CODE_BYTES must be greater than zero");
        }
        if self.limits.max_output_bytes == 0 {
            bail!("PYRUN_MAX_OUTPUT_BYTES must be greater than zero");
        }
        if self.container.memory_mb == 0 {
            bail!("PYRUN_MEMORY_MB must be greater than zero");
        }
        if self.container.checked_memory_bytes().is_none() {
            bail!("PYRUN_MEMORY_MB is too large ({} MB)", self.container.memory_mb);
        }
        if !(self.container.cpus > 0.0) {
            bail!("PYRUN_CPUS must be greater than zero");
        }
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value '{}' for {}: {}", raw, key, e)),
        None => Ok(default),
    }
}
