/*
 * Error type for the window-procedure tracker. Native failures carry the OS status
 * code so callers can tell the expected "window already gone" case apart from
 * failures that indicate a broken threading or lifetime assumption.
 */
use crate::types::CharMode;
use thiserror::Error;

/// `ERROR_INVALID_WINDOW_HANDLE`.
pub const ERROR_INVALID_WINDOW_HANDLE_CODE: u32 = 1400;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Operation failed: {0}")]
    OperationFailed(String),
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
    #[error("{operation} failed with status {code}")]
    Os { operation: &'static str, code: u32 },
    #[error("No native default window procedure available for {0:?} windows")]
    FallbackUnavailable(CharMode),
    #[error("Callback registry is shutting down; {0}")]
    RegistryClosed(String),
}

impl PlatformError {
    pub fn os(operation: &'static str, code: u32) -> Self {
        PlatformError::Os { operation, code }
    }

    /// True when the failure only means the target window no longer exists.
    pub fn is_invalid_window_handle(&self) -> bool {
        match self {
            PlatformError::Os { code, .. } => *code == ERROR_INVALID_WINDOW_HANDLE_CODE,
            _ => false,
        }
    }
}

#[cfg(target_os = "windows")]
impl From<windows::core::Error> for PlatformError {
    fn from(err: windows::core::Error) -> Self {
        // HRESULT_FROM_WIN32 keeps the Win32 status in the low word.
        let hresult = err.code().0 as u32;
        let code = if (hresult & 0xFFFF_0000) == 0x8007_0000 {
            hresult & 0xFFFF
        } else {
            hresult
        };
        PlatformError::Os {
            operation: "Win32 call",
            code,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;
