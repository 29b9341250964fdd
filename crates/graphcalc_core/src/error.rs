use thiserror::Error;

/// Typed failures surfaced at the engine's public boundary.
///
/// Domain failures (division by zero, `ln` of a negative number) are not errors:
/// they evaluate to NaN and are filtered by consumers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Parse error in `{source_text}`: {message}")]
    Parse {
        source_text: String,
        message: String,
    },
    #[error("Unknown LaTeX command: \\{0}")]
    UnknownMacro(String),
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Function `{0}` is defined recursively")]
    RecursiveDefinition(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Request was cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn parse(source_text: &str, message: impl Into<String>) -> Self {
        EngineError::Parse {
            source_text: source_text.to_string(),
            message: message.into(),
        }
    }
}
