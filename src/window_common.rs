/*
 * Win32 side of the tracker. `Win32Platform` implements `WindowPlatform` on top of
 * user32: style and character-mode queries, `GWLP_WNDPROC` get/set with proper
 * last-error handling, message delivery, and the `DefWindowProcA`/`W` lookup.
 *
 * `install_subclass` is the window-attachment path for hosted handlers. It points
 * the window at `subclass_trampoline`, keeps the per-window state behind a window
 * property (like the toolkit keeps its creation context in `GWLP_USERDATA`), and
 * frees that state only when the window can no longer call the trampoline: after a
 * full detach or on WM_NCDESTROY, and never while a call is still on the stack.
 */
use crate::error::{ERROR_INVALID_WINDOW_HANDLE_CODE, PlatformError, Result as PlatformResult};
use crate::platform::WindowPlatform;
use crate::registry::CallbackRegistry;
use crate::subclass::{AttachState, SubclassHandle};
use crate::types::{CharMode, DetachRequest, ProcAddress, SubclassId, WindowHandle};

use std::cell::{Cell, OnceCell};
use std::ffi::c_void;
use std::sync::{Arc, OnceLock};

use windows::Win32::{
    Foundation::{
        GetLastError, HANDLE, HMODULE, HWND, LPARAM, LRESULT, SetLastError, WIN32_ERROR, WPARAM,
    },
    System::LibraryLoader::{GetModuleHandleW, GetProcAddress},
    UI::WindowsAndMessaging::{
        CallWindowProcA, CallWindowProcW, DefWindowProcA, DefWindowProcW, GWL_STYLE, GWLP_WNDPROC, GetPropW,
        GetWindowLongPtrA, GetWindowLongPtrW, IsWindow, IsWindowUnicode, PostMessageW,
        RegisterWindowMessageW, RemovePropW, SendMessageW, SetPropW, SetWindowLongPtrA,
        SetWindowLongPtrW, WM_NCDESTROY, WNDPROC, WS_CHILD,
    },
};
use windows::core::{PCWSTR, s, w};

/// Name of the process-wide registered detach control message.
const DETACH_MESSAGE_NAME: PCWSTR = w!("HwndSubclass.DetachMessage");
/// Window property holding the `HookState` pointer of a tracked subclass.
const HOOK_PROP: PCWSTR = w!("WndProcTracker.Hook");

impl From<HWND> for WindowHandle {
    fn from(hwnd: HWND) -> Self {
        WindowHandle(hwnd.0 as isize)
    }
}

#[inline]
pub(crate) fn to_hwnd(handle: WindowHandle) -> HWND {
    HWND(handle.raw() as *mut c_void)
}

/*
 * `GetWindowLongPtr`/`SetWindowLongPtr` return 0 both for "the value was 0" and for
 * failure. The caller clears the thread's last error first; a 0 result with a
 * non-zero last error is the failure case.
 */
fn check_long_ptr(operation: &'static str, value: isize) -> PlatformResult<isize> {
    if value == 0 {
        let err = unsafe { GetLastError() };
        if err.0 != 0 {
            return Err(PlatformError::os(operation, err.0));
        }
    }
    Ok(value)
}

#[derive(Debug)]
pub struct Win32Platform {
    detach_message: u32,
    user32: OnceLock<usize>,
}

impl Win32Platform {
    pub fn new() -> PlatformResult<Self> {
        let detach_message = unsafe { RegisterWindowMessageW(DETACH_MESSAGE_NAME) };
        if detach_message == 0 {
            let err = unsafe { GetLastError() };
            log::error!("Win32Platform: RegisterWindowMessageW failed: {err:?}");
            return Err(PlatformError::InitializationFailed(format!(
                "RegisterWindowMessageW failed: {err:?}"
            )));
        }
        log::debug!("Win32Platform: Detach message registered as {detach_message:#x}.");
        Ok(Self {
            detach_message,
            user32: OnceLock::new(),
        })
    }

    fn user32(&self) -> Option<HMODULE> {
        if let Some(raw) = self.user32.get() {
            return Some(HMODULE(*raw as *mut c_void));
        }
        match unsafe { GetModuleHandleW(w!("user32.dll")) } {
            Ok(module) if !module.is_invalid() => {
                let raw = *self.user32.get_or_init(|| module.0 as usize);
                Some(HMODULE(raw as *mut c_void))
            }
            Ok(_) => None,
            Err(err) => {
                log::error!("Win32Platform: GetModuleHandleW(user32.dll) failed: {err:?}");
                None
            }
        }
    }
}

impl WindowPlatform for Win32Platform {
    fn is_child_window(&self, hwnd: WindowHandle) -> PlatformResult<bool> {
        let style = unsafe {
            SetLastError(WIN32_ERROR(0));
            GetWindowLongPtrW(to_hwnd(hwnd), GWL_STYLE)
        };
        let style = check_long_ptr("GetWindowLongPtrW", style)?;
        Ok((style as u32 & WS_CHILD.0) != 0)
    }

    fn char_mode(&self, hwnd: WindowHandle) -> CharMode {
        CharMode::from_is_unicode(unsafe { IsWindowUnicode(to_hwnd(hwnd)) }.as_bool())
    }

    fn window_proc(&self, hwnd: WindowHandle, mode: CharMode) -> PlatformResult<ProcAddress> {
        let raw = unsafe {
            SetLastError(WIN32_ERROR(0));
            match mode {
                CharMode::Unicode => GetWindowLongPtrW(to_hwnd(hwnd), GWLP_WNDPROC),
                CharMode::Ansi => GetWindowLongPtrA(to_hwnd(hwnd), GWLP_WNDPROC),
            }
        };
        let raw = check_long_ptr("GetWindowLongPtr(GWLP_WNDPROC)", raw)?;
        Ok(ProcAddress(raw as usize))
    }

    fn set_window_proc(
        &self,
        hwnd: WindowHandle,
        mode: CharMode,
        proc_address: ProcAddress,
    ) -> PlatformResult<ProcAddress> {
        let new_value = proc_address.raw() as isize;
        let previous = unsafe {
            SetLastError(WIN32_ERROR(0));
            match mode {
                CharMode::Unicode => SetWindowLongPtrW(to_hwnd(hwnd), GWLP_WNDPROC, new_value),
                CharMode::Ansi => SetWindowLongPtrA(to_hwnd(hwnd), GWLP_WNDPROC, new_value),
            }
        };
        let previous = check_long_ptr("SetWindowLongPtr(GWLP_WNDPROC)", previous)?;
        Ok(ProcAddress(previous as usize))
    }

    fn send_message(
        &self,
        hwnd: WindowHandle,
        msg: u32,
        wparam: usize,
        lparam: isize,
    ) -> PlatformResult<isize> {
        let target = to_hwnd(hwnd);
        if !unsafe { IsWindow(Some(target)) }.as_bool() {
            return Err(PlatformError::os(
                "SendMessageW",
                ERROR_INVALID_WINDOW_HANDLE_CODE,
            ));
        }
        let result = unsafe { SendMessageW(target, msg, Some(WPARAM(wparam)), Some(LPARAM(lparam))) };
        Ok(result.0)
    }

    fn post_message(
        &self,
        hwnd: WindowHandle,
        msg: u32,
        wparam: usize,
        lparam: isize,
    ) -> PlatformResult<()> {
        unsafe { PostMessageW(Some(to_hwnd(hwnd)), msg, WPARAM(wparam), LPARAM(lparam)) }?;
        Ok(())
    }

    fn resolve_default_proc(&self, mode: CharMode) -> Option<ProcAddress> {
        let module = self.user32()?;
        let symbol = match mode {
            CharMode::Ansi => s!("DefWindowProcA"),
            CharMode::Unicode => s!("DefWindowProcW"),
        };
        unsafe { GetProcAddress(module, symbol) }.map(|func| ProcAddress(func as usize))
    }

    fn detach_message(&self) -> u32 {
        self.detach_message
    }
}

/// Handler invoked for every message while the subclass is attached. `None` forwards
/// the message to the procedure the subclass displaced.
pub type MessageHandler = Box<dyn Fn(HWND, u32, WPARAM, LPARAM) -> Option<LRESULT>>;

struct HookState {
    // Empty until `SubclassHandle::attach` returns; the property is published first.
    handle: OnceCell<SubclassHandle<Win32Platform>>,
    handler: MessageHandler,
    depth: Cell<u32>,
    destroyed: Cell<bool>,
}

fn default_window_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    unsafe {
        if IsWindowUnicode(hwnd).as_bool() {
            DefWindowProcW(hwnd, msg, wparam, lparam)
        } else {
            DefWindowProcA(hwnd, msg, wparam, lparam)
        }
    }
}

fn call_previous(
    handle: &SubclassHandle<Win32Platform>,
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let previous = handle.previous_proc();
    if previous.is_null() {
        return default_window_proc(hwnd, msg, wparam, lparam);
    }
    unsafe {
        let previous_proc: WNDPROC = std::mem::transmute::<usize, WNDPROC>(previous.raw());
        match handle.char_mode() {
            CharMode::Unicode => CallWindowProcW(previous_proc, hwnd, msg, wparam, lparam),
            CharMode::Ansi => CallWindowProcA(previous_proc, hwnd, msg, wparam, lparam),
        }
    }
}

fn dispatch(
    state: &HookState,
    handle: &SubclassHandle<Win32Platform>,
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {

    if msg == handle.registry().platform().detach_message() {
        if let Some(outcome) = handle.handle_detach_message(wparam.0, lparam.0)
            && !outcome.forward
        {
            return LRESULT(outcome.detached as isize);
        }
        return call_previous(handle, hwnd, msg, wparam, lparam);
    }

    if msg == WM_NCDESTROY {
        let result = call_previous(handle, hwnd, msg, wparam, lparam);
        if let Err(err) = handle.detach(true) {
            log::warn!("Subclass: Detach during WM_NCDESTROY of HWND {hwnd:?} failed: {err}");
        }
        handle.mark_window_destroyed();
        state.destroyed.set(true);
        return result;
    }

    if handle.is_active()
        && let Some(result) = (state.handler)(hwnd, msg, wparam, lparam)
    {
        return result;
    }
    call_previous(handle, hwnd, msg, wparam, lparam)
}

unsafe extern "system" fn subclass_trampoline(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let raw = unsafe { GetPropW(hwnd, HOOK_PROP) };
    if raw.is_invalid() {
        return default_window_proc(hwnd, msg, wparam, lparam);
    }
    let state_ptr = raw.0 as *mut HookState;
    let state = unsafe { &*state_ptr };
    let Some(handle) = state.handle.get() else {
        return default_window_proc(hwnd, msg, wparam, lparam);
    };

    state.depth.set(state.depth.get() + 1);
    let result = dispatch(state, handle, hwnd, msg, wparam, lparam);
    let depth = state.depth.get() - 1;
    state.depth.set(depth);

    // Once fully detached the window no longer reaches us, so the state can go
    // as soon as the outermost call returns.
    if depth == 0 && (state.destroyed.get() || handle.state() == AttachState::Detached) {
        unsafe {
            let _ = RemovePropW(hwnd, HOOK_PROP);
            drop(Box::from_raw(state_ptr));
        }
    }
    result
}

/*
 * Subclasses `hwnd` with `handler` and tracks it in `registry`. Must be called on the
 * window's owning thread. A window carries at most one subclass installed this way;
 * other subclasses can still be stacked through `SubclassHandle` directly.
 */
pub fn install_subclass(
    registry: &Arc<CallbackRegistry<Win32Platform>>,
    hwnd: HWND,
    handler: MessageHandler,
) -> PlatformResult<SubclassId> {
    if !unsafe { GetPropW(hwnd, HOOK_PROP) }.is_invalid() {
        return Err(PlatformError::OperationFailed(format!(
            "HWND {hwnd:?} already carries a tracked subclass"
        )));
    }

    // The trampoline must find its state from the first message it receives, so the
    // property goes in before the window procedure is swapped.
    let state = Box::into_raw(Box::new(HookState {
        handle: OnceCell::new(),
        handler,
        depth: Cell::new(0),
        destroyed: Cell::new(false),
    }));
    if let Err(err) = unsafe { SetPropW(hwnd, HOOK_PROP, Some(HANDLE(state as *mut c_void))) } {
        log::error!("Subclass: SetPropW failed for HWND {hwnd:?}: {err:?}");
        drop(unsafe { Box::from_raw(state) });
        return Err(err.into());
    }

    #[allow(clippy::fn_to_numeric_cast)]
    let trampoline = ProcAddress(subclass_trampoline as usize);
    let handle = match SubclassHandle::attach(registry, WindowHandle::from(hwnd), trampoline) {
        Ok(handle) => handle,
        Err(err) => {
            unsafe {
                let _ = RemovePropW(hwnd, HOOK_PROP);
                drop(Box::from_raw(state));
            }
            return Err(err);
        }
    };
    let id = handle.id();
    let state = unsafe { &*state };
    if state.handle.set(handle).is_err() {
        return Err(PlatformError::OperationFailed(format!(
            "HWND {hwnd:?} subclass state was initialized twice"
        )));
    }

    log::debug!("Subclass: Installed tracked subclass {id:?} on HWND {hwnd:?}.");
    Ok(id)
}

/// Asks the subclass `id` on `hwnd` to detach itself. Returns the subclass's reply.
pub fn request_detach(
    platform: &Win32Platform,
    hwnd: HWND,
    id: SubclassId,
    force: bool,
) -> PlatformResult<bool> {
    let (wparam, lparam) = DetachRequest::targeted(id, force).encode();
    let reply = platform.send_message(
        WindowHandle::from(hwnd),
        platform.detach_message(),
        wparam,
        lparam,
    )?;
    Ok(reply != 0)
}
