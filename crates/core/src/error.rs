use thiserror::Error;

/// Errors that can occur in the game engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Drawing from an empty shoe is a caller contract violation: the
    /// episode driver must reshuffle before dealing.
    #[error("draw from empty shoe; reshuffle before drawing")]
    EmptyShoe,

    #[error("invalid configuration: {0}")]
    Config(String),
}
