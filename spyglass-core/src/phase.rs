//! Session lifecycle state machine.
//!
//! Models the full life of an RFB console session with validated
//! transitions that return `Result` instead of panicking.

use std::time::Instant;

use crate::error::RfbError;

// ── SessionPhase ─────────────────────────────────────────────────

/// The current phase of an RFB session.
///
/// ```text
///  Connecting ──► Handshaking ──► Authenticating ──► Initializing
///       │              │                │                 │
///       │              │                │                 ▼
///       │              │                │               Active
///       │              │                │                 │
///       ▼              ▼                ▼                 ▼
///       └──────────────┴────────► Closing ──────────► Closed
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// TCP (and optionally TLS) connection being established.
    #[default]
    Connecting,

    /// Exchanging the 12-byte protocol version lines.
    Handshaking,

    /// Running the security handshake.
    Authenticating,

    /// Client-init sent; reading the server-init message.
    Initializing,

    /// Sender and receiver loops running.
    Active {
        /// When the session entered the `Active` phase.
        since: Instant,
    },

    /// Teardown in progress.
    Closing,

    /// Resources released. Terminal state.
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Handshaking => write!(f, "Handshaking"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Active { .. } => write!(f, "Active"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionPhase {
    /// Returns `true` when both protocol loops are (or should be) running.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Returns `true` once the session has released its resources.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// How long the session has been in the `Active` phase.
    ///
    /// Returns `None` for any other phase.
    pub fn active_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Active { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Handshaking`.
    ///
    /// Valid from: `Connecting`.
    pub fn begin_handshake(&mut self) -> Result<(), RfbError> {
        match self {
            Self::Connecting => {
                *self = Self::Handshaking;
                Ok(())
            }
            _ => Err(RfbError::InvalidPhase(
                "cannot handshake: not in Connecting phase",
            )),
        }
    }

    /// Transition to `Authenticating`.
    ///
    /// Valid from: `Handshaking`.
    pub fn begin_authentication(&mut self) -> Result<(), RfbError> {
        match self {
            Self::Handshaking => {
                *self = Self::Authenticating;
                Ok(())
            }
            _ => Err(RfbError::InvalidPhase(
                "cannot authenticate: not in Handshaking phase",
            )),
        }
    }

    /// Transition to `Initializing`.
    ///
    /// Valid from: `Authenticating`.
    pub fn begin_initialization(&mut self) -> Result<(), RfbError> {
        match self {
            Self::Authenticating => {
                *self = Self::Initializing;
                Ok(())
            }
            _ => Err(RfbError::InvalidPhase(
                "cannot initialize: not in Authenticating phase",
            )),
        }
    }

    /// Transition to `Active`.
    ///
    /// Valid from: `Initializing`.
    pub fn activate(&mut self) -> Result<(), RfbError> {
        match self {
            Self::Initializing => {
                *self = Self::Active {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(RfbError::InvalidPhase(
                "cannot activate: not in Initializing phase",
            )),
        }
    }

    /// Transition to `Closing`.
    ///
    /// Valid from: any phase that still holds resources.
    pub fn begin_close(&mut self) -> Result<(), RfbError> {
        match self {
            Self::Closing | Self::Closed => Err(RfbError::InvalidPhase(
                "cannot close: already closing or closed",
            )),
            _ => {
                *self = Self::Closing;
                Ok(())
            }
        }
    }

    /// Transition to `Closed`.
    ///
    /// Valid from: `Closing`.
    pub fn finish_close(&mut self) -> Result<(), RfbError> {
        match self {
            Self::Closing => {
                *self = Self::Closed;
                Ok(())
            }
            _ => Err(RfbError::InvalidPhase(
                "cannot finish close: not in Closing phase",
            )),
        }
    }

    /// Force-reset to `Closed` regardless of current phase.
    ///
    /// Use for unrecoverable errors mid-stream.
    pub fn force_close(&mut self) {
        *self = Self::Closed;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut phase = SessionPhase::Connecting;

        phase.begin_handshake().unwrap();
        assert_eq!(phase, SessionPhase::Handshaking);

        phase.begin_authentication().unwrap();
        assert_eq!(phase, SessionPhase::Authenticating);

        phase.begin_initialization().unwrap();
        assert_eq!(phase, SessionPhase::Initializing);

        phase.activate().unwrap();
        assert!(phase.is_active());
        assert!(phase.active_duration().is_some());

        phase.begin_close().unwrap();
        assert_eq!(phase, SessionPhase::Closing);

        phase.finish_close().unwrap();
        assert!(phase.is_closed());
    }

    #[test]
    fn invalid_transition_activate_from_connecting() {
        let mut phase = SessionPhase::Connecting;
        assert!(phase.activate().is_err());
    }

    #[test]
    fn invalid_transition_handshake_twice() {
        let mut phase = SessionPhase::Connecting;
        phase.begin_handshake().unwrap();
        assert!(phase.begin_handshake().is_err());
    }

    #[test]
    fn close_from_any_live_phase() {
        for mut phase in [
            SessionPhase::Connecting,
            SessionPhase::Handshaking,
            SessionPhase::Authenticating,
            SessionPhase::Initializing,
            SessionPhase::Active {
                since: Instant::now(),
            },
        ] {
            phase.begin_close().unwrap();
            assert_eq!(phase, SessionPhase::Closing);
        }
    }

    #[test]
    fn close_is_not_reentrant() {
        let mut phase = SessionPhase::Closing;
        assert!(phase.begin_close().is_err());

        let mut phase = SessionPhase::Closed;
        assert!(phase.begin_close().is_err());
    }

    #[test]
    fn force_close_from_any_phase() {
        let mut phase = SessionPhase::Active {
            since: Instant::now(),
        };
        phase.force_close();
        assert!(phase.is_closed());
    }

    #[test]
    fn display_format() {
        assert_eq!(SessionPhase::Connecting.to_string(), "Connecting");
        assert_eq!(SessionPhase::Authenticating.to_string(), "Authenticating");
        assert_eq!(
            SessionPhase::Active {
                since: Instant::now()
            }
            .to_string(),
            "Active"
        );
        assert_eq!(SessionPhase::Closed.to_string(), "Closed");
    }

    #[test]
    fn default_phase_is_connecting() {
        assert_eq!(SessionPhase::default(), SessionPhase::Connecting);
    }
}
