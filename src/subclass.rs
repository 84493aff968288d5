/*
 * One window-procedure subclass: "this window's procedure currently points at a
 * hosted callback". The handle installs the hook procedure, remembers what it
 * displaced, and registers itself with the `CallbackRegistry` so the shutdown sweep
 * can find the window even if nobody ever calls `detach`.
 *
 * Two lifetimes meet here. The handle (and whatever state the hook procedure reads
 * through it) is owned by Rust; the window procedure pointer is owned by the OS and
 * can be invoked from the window's thread until it is replaced. A handle must
 * therefore stay alive while it is `Attached` or `Bypassed`; `detach` or the
 * registry's sweep is what ends the OS side.
 *
 * All mutating calls are expected on the window's owning thread, which is also
 * where the detach control message is delivered.
 */
use crate::error::{PlatformError, Result as PlatformResult};
use crate::platform::WindowPlatform;
use crate::registry::CallbackRegistry;
use crate::types::{CharMode, DetachRequest, ProcAddress, RegistryState, SubclassId, WindowHandle};

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttachState {
    /// The hook procedure is installed and handling messages.
    Attached = 0,
    /// Another procedure was chained on top, so ours could not be removed; it stays
    /// in the chain and forwards everything to `previous_proc`.
    Bypassed = 1,
    Detached = 2,
}

impl AttachState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => AttachState::Attached,
            1 => AttachState::Bypassed,
            _ => AttachState::Detached,
        }
    }
}

/// Result of handling a detach control message that was addressed to this subclass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetachOutcome {
    pub detached: bool,
    /// Pass the message on to `previous_proc` so stacked subclasses see it too.
    pub forward: bool,
}

pub struct SubclassHandle<P: WindowPlatform> {
    id: SubclassId,
    registry: Arc<CallbackRegistry<P>>,
    hwnd: WindowHandle,
    mode: CharMode,
    hook_proc: ProcAddress,
    previous_proc: ProcAddress,
    state: AtomicU8,
}

impl<P: WindowPlatform> SubclassHandle<P> {
    pub fn attach(
        registry: &Arc<CallbackRegistry<P>>,
        hwnd: WindowHandle,
        hook_proc: ProcAddress,
    ) -> PlatformResult<Self> {
        if hwnd.is_null() {
            return Err(PlatformError::InvalidHandle(
                "Cannot subclass a null HWND".to_string(),
            ));
        }
        if hook_proc.is_null() {
            return Err(PlatformError::OperationFailed(format!(
                "Subclass procedure for HWND {hwnd:?} is null"
            )));
        }
        if registry.state() == RegistryState::ShuttingDown {
            return Err(PlatformError::RegistryClosed(format!(
                "refusing to subclass HWND {hwnd:?}"
            )));
        }

        let platform = registry.platform();
        let mode = platform.char_mode(hwnd);
        let previous_proc = platform.set_window_proc(hwnd, mode, hook_proc)?;
        let id = SubclassId::next();
        registry.register(id, hwnd);

        log::debug!(
            "Subclass: Attached {id:?} to HWND {hwnd:?} ({mode:?}), previous procedure {previous_proc:?}."
        );
        Ok(Self {
            id,
            registry: Arc::clone(registry),
            hwnd,
            mode,
            hook_proc,
            previous_proc,
            state: AtomicU8::new(AttachState::Attached as u8),
        })
    }

    pub fn id(&self) -> SubclassId {
        self.id
    }

    pub fn window(&self) -> WindowHandle {
        self.hwnd
    }

    pub fn char_mode(&self) -> CharMode {
        self.mode
    }

    pub fn hook_proc(&self) -> ProcAddress {
        self.hook_proc
    }

    /// Where messages go once this subclass is done with them.
    pub fn previous_proc(&self) -> ProcAddress {
        self.previous_proc
    }

    pub fn state(&self) -> AttachState {
        AttachState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry<P>> {
        &self.registry
    }

    /// True while the hook should handle messages rather than just forward them.
    pub fn is_active(&self) -> bool {
        self.state() == AttachState::Attached
    }

    fn transition(&self, next: AttachState) {
        let previous = AttachState::from_raw(self.state.swap(next as u8, Ordering::AcqRel));
        if previous == AttachState::Attached {
            self.registry.unregister(self.id);
        }
        log::debug!(
            "Subclass: {:?} on HWND {:?} moved {previous:?} -> {next:?}.",
            self.id,
            self.hwnd
        );
    }

    /*
     * Removes this subclass from the window. If our procedure is still the
     * outermost one, the displaced procedure is put back. If something else has
     * been chained on top, only a forced detach succeeds: ours stays in the chain
     * as a pass-through. Returns whether the subclass is detached afterwards.
     */
    pub fn detach(&self, force: bool) -> PlatformResult<bool> {
        let state = self.state();
        if state == AttachState::Detached {
            return Ok(true);
        }

        let platform = self.registry.platform();
        let current = match platform.window_proc(self.hwnd, self.mode) {
            Ok(current) => current,
            Err(err) if err.is_invalid_window_handle() => {
                log::debug!(
                    "Subclass: HWND {:?} already destroyed while detaching {:?}.",
                    self.hwnd,
                    self.id
                );
                self.transition(AttachState::Detached);
                return Ok(true);
            }
            Err(err) => return Err(err),
        };

        if current == self.hook_proc {
            match platform.set_window_proc(self.hwnd, self.mode, self.previous_proc) {
                Ok(_) => {}
                Err(err) if err.is_invalid_window_handle() => {}
                Err(err) => return Err(err),
            }
            self.transition(AttachState::Detached);
            Ok(true)
        } else if force || state == AttachState::Bypassed {
            if state != AttachState::Bypassed {
                self.transition(AttachState::Bypassed);
            }
            Ok(true)
        } else {
            log::debug!(
                "Subclass: {:?} is not the outermost procedure on HWND {:?} (current {current:?}); polite detach declined.",
                self.id,
                self.hwnd
            );
            Ok(false)
        }
    }

    /// The window is being destroyed; nothing will call the hook procedure again.
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    pub(crate) fn mark_window_destroyed(&self) {
        if self.state() != AttachState::Detached {
            self.transition(AttachState::Detached);
        }
    }

    /// Applies a detach control message. `None` when the message targets another subclass.
    pub fn handle_detach_message(&self, wparam: usize, lparam: isize) -> Option<DetachOutcome> {
        let request = DetachRequest::decode(wparam, lparam);
        if !request.applies_to(self.id) {
            return None;
        }

        let detached = match self.detach(request.force) {
            Ok(detached) => detached,
            Err(err) => {
                log::warn!(
                    "Subclass: Detach request for {:?} on HWND {:?} failed: {err}",
                    self.id,
                    self.hwnd
                );
                false
            }
        };
        Some(DetachOutcome {
            detached,
            forward: request.forward,
        })
    }
}

impl<P: WindowPlatform> Drop for SubclassHandle<P> {
    fn drop(&mut self) {
        if self.state() == AttachState::Detached {
            return;
        }
        if let Err(err) = self.detach(false) {
            log::warn!(
                "Subclass: Detach on drop of {:?} (HWND {:?}) failed: {err}",
                self.id,
                self.hwnd
            );
        }
        if self.state() != AttachState::Detached {
            log::warn!(
                "Subclass: {:?} dropped while HWND {:?} may still call its procedure.",
                self.id,
                self.hwnd
            );
        }
    }
}
