//! Herald error taxonomy.
//!
//! The split matters operationally: transient transport errors are retried
//! with backoff, `LoggedOut` is terminal and needs manual re-auth, and
//! `LockContention` is not a failure at all — just "unavailable now".

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HeraldError>;

#[derive(Error, Debug)]
pub enum HeraldError {
    /// Transient transport/connection error. Retried with backoff.
    #[error("transport error: {0}")]
    Transport(String),

    /// Terminal connection loss: logged out or banned by the transport.
    /// No auto-reconnect; the operator must re-authenticate.
    #[error("logged out by transport: {0}")]
    LoggedOut(String),

    /// A dispatch was attempted without an open connection.
    #[error("transport is not connected")]
    NotConnected,

    /// A lock needed for the operation is held by another in-flight
    /// dispatch. Fail-fast signal, never retried blindly.
    #[error("lock contention: {0}")]
    LockContention(String),

    /// A send to one recipient failed. `connection_lost` marks errors
    /// that indicate the connection itself is gone, which aborts the
    /// rest of the dispatch.
    #[error("send to {recipient} failed: {reason}")]
    Send {
        recipient: String,
        reason: String,
        connection_lost: bool,
    },

    /// The content source could not be reached or returned garbage.
    #[error("content fetch failed: {0}")]
    Fetch(String),

    /// Invalid configuration: bad cron expression, missing credential.
    /// Rejected synchronously at the point of registration/use.
    #[error("configuration error: {0}")]
    Config(String),

    /// The latest item is the one already dispatched and the caller did
    /// not force a re-send.
    #[error("no new item since last dispatch")]
    NothingNew,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HeraldError {
    /// Errors that mean the connection itself is gone, not just one unit
    /// of work.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            HeraldError::Transport(_) | HeraldError::LoggedOut(_) | HeraldError::NotConnected => {
                true
            }
            HeraldError::Send {
                connection_lost, ..
            } => *connection_lost,
            _ => false,
        }
    }

    /// Terminal errors are never auto-retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, HeraldError::LoggedOut(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lost_classification() {
        assert!(HeraldError::Transport("socket closed".into()).is_connection_lost());
        assert!(HeraldError::NotConnected.is_connection_lost());
        assert!(
            HeraldError::Send {
                recipient: "g1".into(),
                reason: "stream reset".into(),
                connection_lost: true,
            }
            .is_connection_lost()
        );
        assert!(
            !HeraldError::Send {
                recipient: "g1".into(),
                reason: "rejected".into(),
                connection_lost: false,
            }
            .is_connection_lost()
        );
        assert!(!HeraldError::LockContention("busy".into()).is_connection_lost());
    }

    #[test]
    fn test_only_logout_is_terminal() {
        assert!(HeraldError::LoggedOut("banned".into()).is_terminal());
        assert!(!HeraldError::Transport("timeout".into()).is_terminal());
        assert!(!HeraldError::NothingNew.is_terminal());
    }
}
