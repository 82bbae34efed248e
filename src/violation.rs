use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discrete breach of exam rules.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    TabSwitch,
    FullscreenExit,
    CopyAttempt,
    PasteAttempt,
    RightClick,
}

impl ViolationType {
    pub const ALL: [ViolationType; 5] = [
        ViolationType::TabSwitch,
        ViolationType::FullscreenExit,
        ViolationType::CopyAttempt,
        ViolationType::PasteAttempt,
        ViolationType::RightClick,
    ];

    /// Stable storage name, shared with the violation table.
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationType::TabSwitch => "tab_switch",
            ViolationType::FullscreenExit => "fullscreen_exit",
            ViolationType::CopyAttempt => "copy_attempt",
            ViolationType::PasteAttempt => "paste_attempt",
            ViolationType::RightClick => "right_click",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| anyhow!("unknown violation type '{}'", value))
    }

    /// Short sentence shown to the student ahead of the warning text.
    pub fn describe(self) -> &'static str {
        match self {
            ViolationType::TabSwitch => "You left the exam tab.",
            ViolationType::FullscreenExit => "You exited fullscreen mode.",
            ViolationType::CopyAttempt => "Copying is not allowed during the exam.",
            ViolationType::PasteAttempt => "Pasting is not allowed during the exam.",
            ViolationType::RightClick => "Right-click is disabled during the exam.",
        }
    }
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A violation as captured by the live session. Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViolationRecord {
    pub timestamp: DateTime<Utc>,
    pub violation_type: ViolationType,
    /// Seconds spent away; only populated for `TabSwitch`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
}

impl ViolationRecord {
    pub fn new(violation_type: ViolationType, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            violation_type,
            duration_seconds: None,
        }
    }

    pub fn tab_switch(timestamp: DateTime<Utc>, duration_seconds: u64) -> Self {
        Self {
            timestamp,
            violation_type: ViolationType::TabSwitch,
            duration_seconds: Some(duration_seconds),
        }
    }
}
