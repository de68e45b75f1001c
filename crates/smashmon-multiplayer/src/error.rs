use smashmon_events::DispatchError;
use smashmon_net::NetError;

/// Errors raised by the bridge and the server controller.
#[derive(Debug, thiserror::Error)]
pub enum MultiplayerError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// An event addressed to one client named an address that does not parse.
    #[error("invalid client address {0:?}")]
    InvalidAddress(String),
}
