//! Classification of daemon status text.
//!
//! Pure functions only: the monitor feeds in whatever status text it has
//! collected so far and gets back the single most significant signal.
//!
//! Precedence between kinds is fixed:
//! `AuthFailed > ProposalMismatch > Unreachable > ConfigRejected > Established`.
//! Between matches of the same kind, the later line wins.
//!
//! Only evidence of a usable data channel counts as established: an IPsec
//! `CHILD_SA` (or the `INSTALLED` line `ipsec statusall` prints for one),
//! or a PPP session that negotiated a local address over L2TP. A phase-one
//! `IKE_SA` alone says nothing about whether the tunnel will come up.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Line a backend appends when its connect command exits non-zero before
/// the daemon reported anything definitive.
pub const CONNECT_EXITED: &str = "connect command exited unsuccessfully";

/// Authentication rejected by the peer, PSK mismatch, or PPP login refused.
static AUTH_FAILED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)AUTHENTICATION_FAILED|authentication failed|authentication of .* failed|pre-shared key mismatch|INVALID_PAYLOAD.*PSK|invalid HASH_V1 payload|peer refused to authenticate",
    )
    .unwrap_or_else(|_| unreachable!())
});

/// No cipher suite acceptable to both sides.
static PROPOSAL_MISMATCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)NO_PROPOSAL_CHOSEN|no proposal chosen|no (matching|acceptable) proposal")
        .unwrap_or_else(|_| unreachable!())
});

/// The peer never answered or could not be addressed.
static UNREACHABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)giving up after|peer not responding|unable to resolve|no route to host|timed out|establishing connection .* failed|maximum retries exceeded",
    )
    .unwrap_or_else(|_| unreachable!())
});

/// The daemon does not know the connection it was asked to bring up.
static CONFIG_REJECTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)no config named|{}",
        regex::escape(CONNECT_EXITED)
    ))
    .unwrap_or_else(|_| unreachable!())
});

/// A data channel is up.
static ESTABLISHED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)CHILD_SA .*\bestablished\b|connection '[^']*' established successfully|\{\d+\}:\s+INSTALLED\b|local\s+IP address\s+\d",
    )
    .unwrap_or_else(|_| unreachable!())
});

/// Kind of definitive signal found in status text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// The tunnel is established.
    Established,
    /// The daemon has no configuration for the connection.
    ConfigRejected,
    /// The peer could not be reached.
    Unreachable,
    /// No common cipher proposal.
    ProposalMismatch,
    /// Authentication was rejected.
    AuthFailed,
}

impl SignalKind {
    /// Rank used to pick between kinds; higher wins.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            Self::Established => 0,
            Self::ConfigRejected => 1,
            Self::Unreachable => 2,
            Self::ProposalMismatch => 3,
            Self::AuthFailed => 4,
        }
    }

    /// Whether this signal means the tunnel came up.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Established)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Established => write!(f, "established"),
            Self::ConfigRejected => write!(f, "configuration rejected"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::ProposalMismatch => write!(f, "proposal mismatch"),
            Self::AuthFailed => write!(f, "authentication failed"),
        }
    }
}

/// A classified line of status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// What the line indicates.
    pub kind: SignalKind,
    /// The matching line, trimmed.
    pub line: String,
    /// Zero-based index of the line in the input.
    pub line_index: usize,
}

/// Classify one line, returning the highest-precedence kind it matches.
#[must_use]
pub fn classify_line(line: &str) -> Option<SignalKind> {
    if AUTH_FAILED.is_match(line) {
        Some(SignalKind::AuthFailed)
    } else if PROPOSAL_MISMATCH.is_match(line) {
        Some(SignalKind::ProposalMismatch)
    } else if UNREACHABLE.is_match(line) {
        Some(SignalKind::Unreachable)
    } else if CONFIG_REJECTED.is_match(line) {
        Some(SignalKind::ConfigRejected)
    } else if ESTABLISHED.is_match(line) {
        Some(SignalKind::Established)
    } else {
        None
    }
}

/// Classify a block of status text read in order.
///
/// Returns `None` if no line carries a definitive signal.
#[must_use]
pub fn classify(text: &str) -> Option<Signal> {
    let mut best: Option<Signal> = None;

    for (line_index, line) in text.lines().enumerate() {
        let Some(kind) = classify_line(line) else {
            continue;
        };

        let replace = best
            .as_ref()
            .is_none_or(|current| kind.precedence() >= current.kind.precedence());

        if replace {
            best = Some(Signal {
                kind,
                line: line.trim().to_string(),
                line_index,
            });
        }
    }

    best
}
