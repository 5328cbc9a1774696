use thiserror::Error;

use crate::frame::OpCode;

/// errors during connect, handshake and frame exchange
#[derive(Debug, Error)]
pub enum WsError {
    #[error("dns resolve failed for `{0}`")]
    ResolveFailed(String),
    #[error("connection failed `{0}`")]
    ConnectionFailed(String),
    #[error("load cert/key failed `{0}`")]
    LoadCertFailed(String),
    #[error("tls handshake failed `{0}`")]
    TlsFailed(String),
    #[error("{0}")]
    HandshakeFailed(String),
    #[error("io error {0:?}")]
    Io(#[from] std::io::Error),
    #[error("{error}")]
    Protocol {
        close_code: u16,
        error: ProtocolError,
    },
}

impl WsError {
    pub(crate) fn protocol(close_code: u16, error: ProtocolError) -> Self {
        WsError::Protocol { close_code, error }
    }
}

/// errors while decoding or validating a single frame
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported frame {0:?}")]
    UnsupportedFrame(OpCode),
    #[error("fragmented control frame")]
    FragmentedControlFrame,
    #[error("control frame is too big {0}")]
    ControlFrameTooBig(u64),
    #[error("unexpected payload mask")]
    UnexpectedMask,
    #[error("missing payload mask")]
    MissingMask,
    #[error("payload too large for this platform {0}")]
    PayloadTooLarge(u64),
}
