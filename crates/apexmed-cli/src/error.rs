use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] apexmed_core::ValidationError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Core(#[from] apexmed_core::CoreError),

    #[error(transparent)]
    Config(#[from] apexmed_core::ConfigError),

    #[error(transparent)]
    Store(#[from] apexmed_core::StoreError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Command(_) => 2,
            Self::Core(_) => 2,
            Self::Config(_) => 6,
            Self::Serialization(_) => 4,
            Self::Store(_) => 10,
            Self::Io(_) => 10,
        }
    }
}
