/*
 * The seam between the tracker and the operating system. Every native call the
 * registry, the fallback cache and the subclass lifecycle need goes through
 * `WindowPlatform`, so the shutdown protocol can be driven against a recording
 * double in tests and against `window_common::Win32Platform` in production.
 */
use crate::error::Result as PlatformResult;
use crate::types::{CharMode, ProcAddress, WindowHandle};

pub trait WindowPlatform: Send + Sync {
    /// Whether the window's style bits contain `WS_CHILD`.
    fn is_child_window(&self, hwnd: WindowHandle) -> PlatformResult<bool>;

    fn char_mode(&self, hwnd: WindowHandle) -> CharMode;

    fn window_proc(&self, hwnd: WindowHandle, mode: CharMode) -> PlatformResult<ProcAddress>;

    /// Replaces the window procedure and returns the one it displaced.
    fn set_window_proc(
        &self,
        hwnd: WindowHandle,
        mode: CharMode,
        proc_address: ProcAddress,
    ) -> PlatformResult<ProcAddress>;

    /// Synchronous delivery; blocks until the target window has handled the message.
    fn send_message(
        &self,
        hwnd: WindowHandle,
        msg: u32,
        wparam: usize,
        lparam: isize,
    ) -> PlatformResult<isize>;

    fn post_message(
        &self,
        hwnd: WindowHandle,
        msg: u32,
        wparam: usize,
        lparam: isize,
    ) -> PlatformResult<()>;

    /// Looks up the native default window procedure for `mode` in its owning module.
    fn resolve_default_proc(&self, mode: CharMode) -> Option<ProcAddress>;

    /// Identifier of the process-wide detach control message.
    fn detach_message(&self) -> u32;
}
