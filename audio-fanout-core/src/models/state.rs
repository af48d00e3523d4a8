use std::fmt;

use serde::{Deserialize, Serialize};

/// Recording session state.
///
/// ```text
/// Stopped ──start──▶ Recording ──pause / interruption──▶ Paused
///    ▲                  │  ▲                                │
///    │                  │  └──────────── resume ────────────┘
///    └── stop / cancel / unrecoverable interruption ◀───────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Stopped,
    Recording,
    Paused,
}

impl SessionState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Recording or paused: sinks are open.
    pub fn is_active(&self) -> bool {
        !self.is_stopped()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Recording => "recording",
            Self::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// External audio-session interruption reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// Another session took the hardware.
    Began,
    /// The competing session ended. `should_resume` is the platform's hint.
    Ended { should_resume: bool },
    /// The hardware is gone for good (device unplugged, media services reset).
    Lost,
}
