/*
 * Recording stand-in for the Win32 window layer. Windows are scripted in a table
 * (style, character mode, current procedure); every call is appended to a journal
 * so tests can assert exactly which native operations a sweep or detach issued.
 */
use crate::error::{ERROR_INVALID_WINDOW_HANDLE_CODE, PlatformError, Result as PlatformResult};
use crate::platform::WindowPlatform;
use crate::types::{CharMode, ProcAddress, WindowHandle};

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) const ANSI_DEFAULT: ProcAddress = ProcAddress(0xA000);
pub(crate) const UNICODE_DEFAULT: ProcAddress = ProcAddress(0xB000);
pub(crate) const DETACH_MESSAGE: u32 = 0xC123;
pub(crate) const HOOK_PROC: ProcAddress = ProcAddress(0x7000);
pub(crate) const ORIGINAL_PROC: ProcAddress = ProcAddress(0x1000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlatformCall {
    IsChild(WindowHandle),
    CharMode(WindowHandle),
    GetProc(WindowHandle),
    SetProc {
        hwnd: WindowHandle,
        mode: CharMode,
        proc_address: ProcAddress,
    },
    Send {
        hwnd: WindowHandle,
        msg: u32,
        wparam: usize,
        lparam: isize,
    },
    Post {
        hwnd: WindowHandle,
        msg: u32,
        wparam: usize,
        lparam: isize,
    },
    ResolveDefault(CharMode),
}

impl PlatformCall {
    pub(crate) fn target(&self) -> Option<WindowHandle> {
        match self {
            PlatformCall::IsChild(hwnd)
            | PlatformCall::CharMode(hwnd)
            | PlatformCall::GetProc(hwnd)
            | PlatformCall::SetProc { hwnd, .. }
            | PlatformCall::Send { hwnd, .. }
            | PlatformCall::Post { hwnd, .. } => Some(*hwnd),
            PlatformCall::ResolveDefault(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
struct MockWindow {
    child: bool,
    mode: CharMode,
    proc_address: ProcAddress,
}

type SendHook = Box<dyn Fn(WindowHandle) + Send + Sync>;

#[derive(Default)]
pub(crate) struct MockPlatform {
    windows: Mutex<HashMap<WindowHandle, MockWindow>>,
    calls: Mutex<Vec<PlatformCall>>,
    set_proc_failures: Mutex<HashMap<WindowHandle, u32>>,
    defaults_unresolvable: AtomicBool,
    // Runs inside `send_message`, standing in for the target window's procedure.
    send_hook: Mutex<Option<SendHook>>,
}

impl MockPlatform {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_window(
        &self,
        hwnd: WindowHandle,
        child: bool,
        mode: CharMode,
        proc_address: ProcAddress,
    ) {
        self.windows.lock().unwrap().insert(
            hwnd,
            MockWindow {
                child,
                mode,
                proc_address,
            },
        );
    }

    pub(crate) fn destroy_window(&self, hwnd: WindowHandle) {
        self.windows.lock().unwrap().remove(&hwnd);
    }

    pub(crate) fn fail_set_proc(&self, hwnd: WindowHandle, code: u32) {
        self.set_proc_failures.lock().unwrap().insert(hwnd, code);
    }

    pub(crate) fn set_defaults_resolvable(&self, resolvable: bool) {
        self.defaults_unresolvable
            .store(!resolvable, Ordering::SeqCst);
    }

    pub(crate) fn on_send(&self, hook: impl Fn(WindowHandle) + Send + Sync + 'static) {
        *self.send_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub(crate) fn proc_of(&self, hwnd: WindowHandle) -> Option<ProcAddress> {
        self.windows
            .lock()
            .unwrap()
            .get(&hwnd)
            .map(|window| window.proc_address)
    }

    pub(crate) fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_for(&self, hwnd: WindowHandle) -> Vec<PlatformCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.target() == Some(hwnd))
            .collect()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn with_window<T>(
        &self,
        hwnd: WindowHandle,
        operation: &'static str,
        f: impl FnOnce(&mut MockWindow) -> T,
    ) -> PlatformResult<T> {
        let mut windows = self.windows.lock().unwrap();
        match windows.get_mut(&hwnd) {
            Some(window) => Ok(f(window)),
            None => Err(PlatformError::os(operation, ERROR_INVALID_WINDOW_HANDLE_CODE)),
        }
    }
}

impl WindowPlatform for MockPlatform {
    fn is_child_window(&self, hwnd: WindowHandle) -> PlatformResult<bool> {
        self.record(PlatformCall::IsChild(hwnd));
        self.with_window(hwnd, "GetWindowLongPtrW", |window| window.child)
    }

    fn char_mode(&self, hwnd: WindowHandle) -> CharMode {
        self.record(PlatformCall::CharMode(hwnd));
        self.with_window(hwnd, "IsWindowUnicode", |window| window.mode)
            .unwrap_or(CharMode::Ansi)
    }

    fn window_proc(&self, hwnd: WindowHandle, _mode: CharMode) -> PlatformResult<ProcAddress> {
        self.record(PlatformCall::GetProc(hwnd));
        self.with_window(hwnd, "GetWindowLongPtrW", |window| window.proc_address)
    }

    fn set_window_proc(
        &self,
        hwnd: WindowHandle,
        mode: CharMode,
        proc_address: ProcAddress,
    ) -> PlatformResult<ProcAddress> {
        self.record(PlatformCall::SetProc {
            hwnd,
            mode,
            proc_address,
        });
        if let Some(code) = self.set_proc_failures.lock().unwrap().get(&hwnd).copied() {
            return Err(PlatformError::os("SetWindowLongPtrW", code));
        }
        self.with_window(hwnd, "SetWindowLongPtrW", |window| {
            std::mem::replace(&mut window.proc_address, proc_address)
        })
    }

    fn send_message(
        &self,
        hwnd: WindowHandle,
        msg: u32,
        wparam: usize,
        lparam: isize,
    ) -> PlatformResult<isize> {
        self.record(PlatformCall::Send {
            hwnd,
            msg,
            wparam,
            lparam,
        });
        let delivered = self.with_window(hwnd, "SendMessageW", |_| 0)?;
        if let Some(hook) = self.send_hook.lock().unwrap().as_ref() {
            hook(hwnd);
        }
        Ok(delivered)
    }

    fn post_message(
        &self,
        hwnd: WindowHandle,
        msg: u32,
        wparam: usize,
        lparam: isize,
    ) -> PlatformResult<()> {
        self.record(PlatformCall::Post {
            hwnd,
            msg,
            wparam,
            lparam,
        });
        self.with_window(hwnd, "PostMessageW", |_| ())
    }

    fn resolve_default_proc(&self, mode: CharMode) -> Option<ProcAddress> {
        self.record(PlatformCall::ResolveDefault(mode));
        if self.defaults_unresolvable.load(Ordering::SeqCst) {
            return None;
        }
        Some(match mode {
            CharMode::Ansi => ANSI_DEFAULT,
            CharMode::Unicode => UNICODE_DEFAULT,
        })
    }

    fn detach_message(&self) -> u32 {
        DETACH_MESSAGE
    }
}
