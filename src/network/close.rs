//! Close Codes
//!
//! Abstract close reasons and their mapping to WebSocket close codes.
//! The game server and this client agree on a small private range of codes
//! (4xxx) on top of the standard normal closure.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

/// Code reported when the transport went away without a close frame.
pub const ABNORMAL_CLOSURE_CODE: u16 = 1006;

/// Largest close reason a control frame can carry (125 bytes minus the code).
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

/// Cut `text` to at most [`MAX_CLOSE_REASON_BYTES`] on a char boundary.
fn truncate_reason(text: &str) -> &str {
    if text.len() <= MAX_CLOSE_REASON_BYTES {
        return text;
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Why a connection is being (or was) closed, independent of transport codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Session finished normally.
    Normal,
    /// The user is leaving before the session ended.
    Leaving,
    /// The client detected a protocol violation or failed internally.
    ClientError,
    /// The server failed.
    ServerError,
}

impl CloseReason {
    /// Transport close code for this reason.
    pub const fn code(self) -> u16 {
        match self {
            CloseReason::Normal => 1000,
            CloseReason::Leaving => 4101,
            CloseReason::ClientError => 4200,
            CloseReason::ServerError => 4300,
        }
    }

    /// Text sent when the caller does not supply a detail string.
    pub const fn default_text(self) -> &'static str {
        match self {
            CloseReason::Normal => "Normal closure",
            CloseReason::Leaving => "Client is leaving",
            CloseReason::ClientError => "Client error",
            CloseReason::ServerError => "Server error",
        }
    }

    /// Map a transport code back to a reason. Codes outside our table are `None`.
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            1000 => Some(CloseReason::Normal),
            4101 => Some(CloseReason::Leaving),
            4200 => Some(CloseReason::ClientError),
            4300 => Some(CloseReason::ServerError),
            _ => None,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_text())
    }
}

/// Build the close frame for `reason`, using `detail` when given.
pub fn close_frame(reason: CloseReason, detail: Option<&str>) -> CloseFrame<'static> {
    let text = truncate_reason(detail.unwrap_or(reason.default_text())).to_string();
    CloseFrame {
        code: CloseCode::from(reason.code()),
        reason: Cow::Owned(text),
    }
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseInfo {
    /// Transport close code.
    pub code: u16,
    /// Abstract reason, when the code is one we know.
    pub reason: Option<CloseReason>,
    /// Human-readable detail sent with the close frame (or the transport error).
    pub detail: String,
    /// Whether a close frame was exchanged. `false` means the transport dropped.
    pub clean: bool,
}

impl CloseInfo {
    /// Closure initiated locally with `reason`.
    pub fn local(reason: CloseReason, detail: Option<&str>) -> Self {
        Self {
            code: reason.code(),
            reason: Some(reason),
            detail: truncate_reason(detail.unwrap_or(reason.default_text())).to_string(),
            clean: true,
        }
    }

    /// Closure described by a peer's close frame. A frame without a body is a
    /// normal closure.
    pub fn from_frame(frame: Option<&CloseFrame<'_>>) -> Self {
        match frame {
            Some(frame) => {
                let code = u16::from(frame.code);
                Self {
                    code,
                    reason: CloseReason::from_code(code),
                    detail: frame.reason.to_string(),
                    clean: true,
                }
            }
            None => Self::local(CloseReason::Normal, None),
        }
    }

    /// Transport went away without a close handshake.
    pub fn abnormal(detail: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSURE_CODE,
            reason: None,
            detail: detail.into(),
            clean: false,
        }
    }

    /// True for a clean closure with the normal code.
    pub fn is_normal(&self) -> bool {
        self.clean && self.reason == Some(CloseReason::Normal)
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clean {
            write!(f, "code {}: {}", self.code, self.detail)
        } else {
            write!(f, "abnormal closure: {}", self.detail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_codes() {
        assert_eq!(CloseReason::Normal.code(), 1000);
        assert_eq!(CloseReason::Leaving.code(), 4101);
        assert_eq!(CloseReason::ClientError.code(), 4200);
        assert_eq!(CloseReason::ServerError.code(), 4300);
    }

    #[test]
    fn test_code_mapping_is_bidirectional() {
        for reason in [
            CloseReason::Normal,
            CloseReason::Leaving,
            CloseReason::ClientError,
            CloseReason::ServerError,
        ] {
            assert_eq!(CloseReason::from_code(reason.code()), Some(reason));
        }
        assert_eq!(CloseReason::from_code(1001), None);
    }

    #[test]
    fn test_close_frame_default_text() {
        let frame = close_frame(CloseReason::Leaving, None);
        assert_eq!(u16::from(frame.code), 4101);
        assert_eq!(frame.reason, "Client is leaving");
    }

    #[test]
    fn test_close_frame_custom_detail() {
        let frame = close_frame(CloseReason::Normal, Some("bye"));
        assert_eq!(u16::from(frame.code), 1000);
        assert_eq!(frame.reason, "bye");
    }

    #[test]
    fn test_close_info_from_peer_frame() {
        let frame = close_frame(CloseReason::ServerError, Some("game crashed"));
        let info = CloseInfo::from_frame(Some(&frame));
        assert_eq!(info.code, 4300);
        assert_eq!(info.reason, Some(CloseReason::ServerError));
        assert_eq!(info.detail, "game crashed");
        assert!(info.clean);
        assert!(!info.is_normal());

        let bare = CloseInfo::from_frame(None);
        assert!(bare.is_normal());
    }

    #[test]
    fn test_abnormal_is_distinguishable() {
        let info = CloseInfo::abnormal("connection reset");
        assert_eq!(info.code, ABNORMAL_CLOSURE_CODE);
        assert!(!info.clean);
        assert!(!info.is_normal());
        assert_eq!(info.to_string(), "abnormal closure: connection reset");
    }

    #[test]
    fn test_long_detail_is_truncated() {
        let detail = "é".repeat(100);
        let frame = close_frame(CloseReason::ClientError, Some(&detail));
        assert!(frame.reason.len() <= MAX_CLOSE_REASON_BYTES);
        assert_eq!(frame.reason.len(), 122);
        assert_eq!(CloseInfo::local(CloseReason::ClientError, Some(&detail)).detail, frame.reason);
    }
}
