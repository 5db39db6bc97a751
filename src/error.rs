use thiserror::Error;

use crate::lex::Position;

/// Errors a host can see from loading or executing a script.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: lexical error: {1}")]
    Lex(Position, String),

    #[error("{0}: parse error: {1}")]
    Parse(Position, String),

    #[error("{0}: {1}")]
    Load(Position, String),

    #[error("{0}: missing require for extension \"{1}\"")]
    ExtensionMissing(Position, String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("host error: {0}")]
    Host(#[source] crate::message::HostError),

    /// Regex/glob pattern, input length or execution budget exceeded.
    /// Absorbed by the matcher (the test yields false); surfaced only when
    /// a caller asks for the raw outcome.
    #[error("match limit exceeded: {0}")]
    MatchLimit(String),

    #[error("evaluation canceled")]
    Canceled,

    /// Internal sentinel implementing the `stop` command. Unwinds through
    /// blocks and is absorbed by `Script::execute`; hosts never observe it.
    #[error("stop")]
    Stop,
}

impl Error {
    pub(crate) fn load(pos: &Position, msg: impl Into<String>) -> Error {
        Error::Load(pos.clone(), msg.into())
    }
}
