use thiserror::Error;

/// The three failure kinds the client distinguishes.
///
/// Validation errors are reported to the user before any request is made and
/// never change state. Transport errors abort the operation with no partial
/// log mutation. Decode errors only ever apply to a single inbound push
/// event and never terminate the subscription.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{0}")]
    Validation(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("undecodable event: {0}")]
    Decode(String),
}

impl ChannelError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}
