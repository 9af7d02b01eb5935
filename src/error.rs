//! Error taxonomy for a recording session.

use std::fmt;
use std::io;

/// Pipeline stage an error surfaced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    Lookup,
    Attach,
    Streaming,
    Encoding,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Configuration => "configuration",
            Stage::Lookup => "lookup",
            Stage::Attach => "attach",
            Stage::Streaming => "streaming",
            Stage::Encoding => "encoding",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("cannot reach hypervisor: {0}")]
    Connection(String),

    #[error("domain not found: {0}")]
    NotFound(String),

    #[error("display unavailable: {0}")]
    DisplayUnavailable(String),

    #[error("display connection refused: {0}")]
    ConnectionRefused(String),

    #[error("display stream failed: {0}")]
    Display(String),

    #[error("encoder failed: {0}")]
    Encoder(String),

    #[error("I/O error during {stage}: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: io::Error,
    },
}

impl RecordError {
    pub fn io(stage: Stage, source: io::Error) -> Self {
        RecordError::Io { stage, source }
    }

    pub fn stage(&self) -> Stage {
        match self {
            RecordError::Configuration(_) => Stage::Configuration,
            RecordError::Connection(_) | RecordError::NotFound(_) => Stage::Lookup,
            RecordError::DisplayUnavailable(_) | RecordError::ConnectionRefused(_) => Stage::Attach,
            RecordError::Display(_) => Stage::Streaming,
            RecordError::Encoder(_) => Stage::Encoding,
            RecordError::Io { stage, .. } => *stage,
        }
    }

    /// Process exit code for this failure. Matches clap's usage code for
    /// configuration problems and the missing-domain case.
    pub fn exit_code(&self) -> u8 {
        match self {
            RecordError::Configuration(_) | RecordError::NotFound(_) => 2,
            _ => 1,
        }
    }
}
