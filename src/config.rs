use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_DB_PATH: &str = "proctor.db";
const DEFAULT_MAX_VIOLATIONS: i32 = 3;
const DEFAULT_WARNING_DURATION_MS: u64 = 5000;
const DEFAULT_SINK_CAPACITY: usize = 256;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Per-session proctoring options. Immutable once a session has started.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProctoringConfig {
    /// Violation count at which the attempt is auto-submitted. Values <= 0
    /// make the first violation terminal.
    pub max_violations: i32,
    pub warning_duration_ms: u64,
    pub enable_fullscreen: bool,
    pub auto_submit_on_max_violations: bool,
    pub track_time_away: bool,
    pub prevent_copy_paste: bool,
    pub prevent_right_click: bool,
    /// Seed the session with violations already logged for the attempt.
    pub resume_from_log: bool,
}

impl Default for ProctoringConfig {
    fn default() -> Self {
        Self {
            max_violations: DEFAULT_MAX_VIOLATIONS,
            warning_duration_ms: DEFAULT_WARNING_DURATION_MS,
            enable_fullscreen: false,
            auto_submit_on_max_violations: true,
            track_time_away: true,
            prevent_copy_paste: true,
            prevent_right_click: true,
            resume_from_log: false,
        }
    }
}

impl ProctoringConfig {
    pub fn validate(&self) -> Result<()> {
        if self.warning_duration_ms == 0 {
            return Err(anyhow!("warning_duration_ms must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
struct ProctordConfigFile {
    db_path: Option<String>,
    test_id: Option<String>,
    student_id: Option<String>,
    proctoring: Option<ProctoringConfig>,
    sink: Option<SinkConfigFile>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    capacity: Option<usize>,
}

/// Configuration for the `proctord` binary.
#[derive(Debug, Clone)]
pub struct ProctordConfig {
    pub db_path: String,
    pub test_id: Option<String>,
    pub student_id: Option<String>,
    pub proctoring: ProctoringConfig,
    pub sink_capacity: usize,
    pub poll_interval_ms: u64,
}

impl ProctordConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PROCTOR_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Same as `load`, with an explicit config file taking the place of
    /// `PROCTOR_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ProctordConfigFile) -> Self {
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            test_id: file.test_id,
            student_id: file.student_id,
            proctoring: file.proctoring.unwrap_or_default(),
            sink_capacity: file
                .sink
                .and_then(|sink| sink.capacity)
                .unwrap_or(DEFAULT_SINK_CAPACITY),
            poll_interval_ms: file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("PROCTOR_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(test_id) = std::env::var("PROCTOR_TEST_ID") {
            if !test_id.trim().is_empty() {
                self.test_id = Some(test_id.trim().to_string());
            }
        }
        if let Ok(student_id) = std::env::var("PROCTOR_STUDENT_ID") {
            if !student_id.trim().is_empty() {
                self.student_id = Some(student_id.trim().to_string());
            }
        }
        if let Ok(max) = std::env::var("PROCTOR_MAX_VIOLATIONS") {
            self.proctoring.max_violations = max
                .trim()
                .parse()
                .map_err(|_| anyhow!("PROCTOR_MAX_VIOLATIONS must be an integer"))?;
        }
        if let Ok(ms) = std::env::var("PROCTOR_WARNING_MS") {
            self.proctoring.warning_duration_ms = ms.trim().parse().map_err(|_| {
                anyhow!("PROCTOR_WARNING_MS must be an integer number of milliseconds")
            })?;
        }
        if let Ok(flag) = std::env::var("PROCTOR_FULLSCREEN") {
            self.proctoring.enable_fullscreen = parse_bool(&flag)
                .ok_or_else(|| anyhow!("PROCTOR_FULLSCREEN must be true or false"))?;
        }
        if let Ok(capacity) = std::env::var("PROCTOR_SINK_CAPACITY") {
            self.sink_capacity = capacity
                .trim()
                .parse()
                .map_err(|_| anyhow!("PROCTOR_SINK_CAPACITY must be a positive integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.proctoring.validate()?;
        if let Some(test_id) = &self.test_id {
            crate::validate_attempt_id("test_id", test_id)?;
        }
        if let Some(student_id) = &self.student_id {
            crate::validate_attempt_id("student_id", student_id)?;
        }
        if self.sink_capacity == 0 {
            return Err(anyhow!("sink capacity must be greater than zero"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ProctordConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
