/*
 * Public entry point for wndproc-tracker, the process-wide registry of window
 * procedures that point at hosted callbacks, and the shutdown sweep that swaps
 * every one of them back to the native default procedure before the host stops
 * being able to run those callbacks.
 *
 * The registry, the subclass lifecycle and the shutdown wiring are written against
 * the `WindowPlatform` trait and compile on every platform, so their logic is unit
 * tested without a window station. `window_common` supplies the Win32
 * implementation and the subclass trampoline on Windows.
 *
 * Typical wiring:
 *   let registry = Arc::new(CallbackRegistry::new(Win32Platform::new()?));
 *   let trigger = ShutdownTrigger::new(Arc::clone(&registry));
 *   trigger.subscribe(&exit_hook)?;
 *   install_subclass(&registry, hwnd, handler)?;
 *   ...
 *   exit_hook.notify();
 *
 * `ProcessExitHook` is not tied to any OS lifetime signal. The host calls `notify()`
 * itself, from the end of `main` or its DLL_PROCESS_DETACH path; if it never does,
 * no sweep runs and tracked windows keep pointing at hosted callbacks.
 */
pub mod error;
pub mod fallback_proc;
pub mod platform;
pub mod registry;
pub mod shutdown;
pub mod subclass;
#[cfg(test)]
pub(crate) mod test_support;
pub mod types;
#[cfg(target_os = "windows")]
pub mod window_common;

pub use error::{PlatformError, Result as PlatformResult};
pub use fallback_proc::FallbackProcedureCache;
pub use platform::WindowPlatform;
pub use registry::{CallbackRegistry, TrackerConfig, WM_CLOSE_ID};
pub use shutdown::{ExitHandler, ExitNotifier, ProcessExitHook, ShutdownTrigger, TriggerState};
pub use subclass::{AttachState, DetachOutcome, SubclassHandle};
pub use types::{
    CharMode, DetachRequest, ProcAddress, RegistryState, SubclassId, SweepReport, WindowHandle,
};
#[cfg(target_os = "windows")]
pub use window_common::{MessageHandler, Win32Platform, install_subclass, request_detach};
