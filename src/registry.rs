/*
 * Process-wide table of live window-procedure subclasses and the shutdown sweep
 * that hands every one of them back to the native default procedure.
 *
 * The window-attachment path registers `(SubclassId, WindowHandle)` when it points a
 * window at a hosted callback and unregisters on an explicit detach. Nothing on the
 * message hot path touches the registry. When the host is about to stop running
 * callbacks, `shutdown_sweep` flips the registry to `ShuttingDown`, takes a snapshot
 * of the table, and for every window in it:
 *
 *   1. sends the detach control message (wildcard, force and forward), but only to
 *      child windows; a top-level window may belong to a host whose message loop is
 *      no longer pumping and a blocking send would hang shutdown;
 *   2. overwrites the window procedure with `DefWindowProcA`/`W` for the window's
 *      character mode, whatever happened in step 1;
 *   3. posts the close message if step 2 displaced a real procedure.
 *
 * Only a set-procedure failure with a status other than ERROR_INVALID_WINDOW_HANDLE is
 * fatal. The remaining windows are still neutralized, then the first fatal error is
 * returned.
 *
 * The table lock is released before any window is touched. A subclass's window
 * procedure reacting to the detach message calls `unregister` on the same thread,
 * and a window on another thread may be blocked in `register` while we send to it;
 * neither may deadlock against the sweep. `unregister` is frozen by the state flag
 * instead, so the snapshot stays exactly the set that gets neutralized.
 */
use crate::error::{PlatformError, Result as PlatformResult};
use crate::fallback_proc::FallbackProcedureCache;
use crate::platform::WindowPlatform;
use crate::types::{DetachRequest, RegistryState, SubclassId, SweepReport, WindowHandle};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// `WM_CLOSE`.
pub const WM_CLOSE_ID: u32 = 0x0010;

/// Tunables for the shutdown sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Post `close_message` to windows whose procedure was swapped out.
    pub post_close_after_neutralize: bool,
    /// Keep sweeping entries registered after the snapshot until none remain.
    pub resweep_late_registrations: bool,
    pub close_message: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            post_close_after_neutralize: true,
            resweep_late_registrations: false,
            close_message: WM_CLOSE_ID,
        }
    }
}

#[derive(Debug)]
struct RegistryTable {
    state: RegistryState,
    entries: HashMap<SubclassId, WindowHandle>,
}

pub struct CallbackRegistry<P: WindowPlatform> {
    platform: P,
    config: TrackerConfig,
    table: Mutex<RegistryTable>,
    // Mirrors `table.state` so `unregister` can bail without taking the lock.
    shutting_down: AtomicBool,
    fallback: FallbackProcedureCache,
}

impl<P: WindowPlatform> CallbackRegistry<P> {
    pub fn new(platform: P) -> Self {
        Self::with_config(platform, TrackerConfig::default())
    }

    pub fn with_config(platform: P, config: TrackerConfig) -> Self {
        Self {
            platform,
            config,
            table: Mutex::new(RegistryTable {
                state: RegistryState::Open,
                entries: HashMap::new(),
            }),
            shutting_down: AtomicBool::new(false),
            fallback: FallbackProcedureCache::new(),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn fallback_procedures(&self) -> &FallbackProcedureCache {
        &self.fallback
    }

    pub fn state(&self) -> RegistryState {
        self.lock_table().state
    }

    fn lock_table(&self) -> MutexGuard<'_, RegistryTable> {
        // Every critical section leaves the table consistent, so a poisoned lock is still usable.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /*
     * Records that `id` now owns `hwnd`'s window procedure. Re-registering an id
     * replaces its window. Accepted even while shutting down, but an entry that
     * arrives after the sweep snapshot is not neutralized unless
     * `resweep_late_registrations` is set.
     */
    pub fn register(&self, id: SubclassId, hwnd: WindowHandle) {
        if hwnd.is_null() {
            log::warn!("CallbackRegistry: Ignoring registration of {id:?} with a null HWND.");
            return;
        }

        let mut table = self.lock_table();
        let previous = table.entries.insert(id, hwnd);
        if table.state == RegistryState::ShuttingDown {
            log::warn!(
                "CallbackRegistry: {id:?} registered HWND {hwnd:?} after shutdown began; it may outlive the sweep."
            );
        } else {
            log::debug!(
                "CallbackRegistry: Registered {id:?} for HWND {hwnd:?} (replaced: {previous:?}, live: {}).",
                table.entries.len()
            );
        }
    }

    /// Forgets `id`. Silently ignored once the shutdown sweep has started.
    pub fn unregister(&self, id: SubclassId) {
        if self.shutting_down.load(Ordering::Acquire) {
            log::debug!("CallbackRegistry: Ignoring unregister of {id:?} during shutdown.");
            return;
        }

        let mut table = self.lock_table();
        if table.state == RegistryState::ShuttingDown {
            log::debug!("CallbackRegistry: Ignoring unregister of {id:?} during shutdown.");
            return;
        }
        if table.entries.remove(&id).is_some() {
            log::debug!(
                "CallbackRegistry: Unregistered {id:?} (live: {}).",
                table.entries.len()
            );
        }
    }

    pub fn registered_window(&self, id: SubclassId) -> Option<WindowHandle> {
        self.lock_table().entries.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.lock_table().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_table().entries.is_empty()
    }

    pub fn shutdown_sweep(&self) -> PlatformResult<SweepReport> {
        let snapshot: Vec<(SubclassId, WindowHandle)> = {
            let mut table = self.lock_table();
            if table.state == RegistryState::ShuttingDown {
                log::warn!("CallbackRegistry: Shutdown sweep already ran; ignoring repeat request.");
                return Ok(SweepReport::default());
            }
            table.state = RegistryState::ShuttingDown;
            self.shutting_down.store(true, Ordering::Release);
            table.entries.iter().map(|(id, hwnd)| (*id, *hwnd)).collect()
        };

        log::info!(
            "CallbackRegistry: Shutdown sweep started for {} registration(s).",
            snapshot.len()
        );

        let mut report = SweepReport::default();
        let mut first_fatal: Option<PlatformError> = None;
        let mut seen_entries: HashSet<(SubclassId, WindowHandle)> = HashSet::new();
        let mut seen_windows: HashSet<WindowHandle> = HashSet::new();

        self.sweep_entries(
            &snapshot,
            &mut seen_entries,
            &mut seen_windows,
            &mut report,
            &mut first_fatal,
        );

        if self.config.resweep_late_registrations {
            loop {
                let late: Vec<(SubclassId, WindowHandle)> = self
                    .lock_table()
                    .entries
                    .iter()
                    .map(|(id, hwnd)| (*id, *hwnd))
                    // A snapshot key re-registered on another window counts as late.
                    .filter(|entry| !seen_entries.contains(entry))
                    .collect();
                if late.is_empty() {
                    break;
                }
                log::warn!(
                    "CallbackRegistry: Re-sweeping {} registration(s) that arrived during shutdown.",
                    late.len()
                );
                report.late_registrations += late.len();
                self.sweep_entries(
                    &late,
                    &mut seen_entries,
                    &mut seen_windows,
                    &mut report,
                    &mut first_fatal,
                );
            }
        }

        match first_fatal {
            Some(err) => {
                log::error!("CallbackRegistry: Shutdown sweep hit an unrecoverable failure: {err}");
                Err(err)
            }
            None => {
                log::info!("CallbackRegistry: Shutdown sweep finished: {report:?}");
                Ok(report)
            }
        }
    }

    fn sweep_entries(
        &self,
        entries: &[(SubclassId, WindowHandle)],
        seen_entries: &mut HashSet<(SubclassId, WindowHandle)>,
        seen_windows: &mut HashSet<WindowHandle>,
        report: &mut SweepReport,
        first_fatal: &mut Option<PlatformError>,
    ) {
        for (id, hwnd) in entries {
            seen_entries.insert((*id, *hwnd));
            // Several subclasses may share one window; it only needs neutralizing once.
            if !seen_windows.insert(*hwnd) {
                continue;
            }
            if let Err(err) = self.neutralize_window(*hwnd, report) {
                log::error!("CallbackRegistry: Failed to neutralize HWND {hwnd:?} ({id:?}): {err}");
                first_fatal.get_or_insert(err);
            }
        }
    }

    fn neutralize_window(&self, hwnd: WindowHandle, report: &mut SweepReport) -> PlatformResult<()> {
        report.visited += 1;

        match self.platform.is_child_window(hwnd) {
            Ok(true) => {
                let (wparam, lparam) = DetachRequest::broadcast_force_and_forward().encode();
                match self
                    .platform
                    .send_message(hwnd, self.platform.detach_message(), wparam, lparam)
                {
                    Ok(_) => report.detach_sent += 1,
                    Err(err) => {
                        log::debug!("CallbackRegistry: Detach message to HWND {hwnd:?} failed: {err}")
                    }
                }
            }
            Ok(false) => {}
            Err(err) => {
                log::debug!("CallbackRegistry: Style query for HWND {hwnd:?} failed: {err}")
            }
        }

        let mode = self.platform.char_mode(hwnd);
        let fallback = self.fallback.get(&self.platform, mode);
        if fallback.is_null() {
            return Err(PlatformError::FallbackUnavailable(mode));
        }

        match self.platform.set_window_proc(hwnd, mode, fallback) {
            Ok(previous) => {
                report.neutralized += 1;
                if !previous.is_null() && self.config.post_close_after_neutralize {
                    match self
                        .platform
                        .post_message(hwnd, self.config.close_message, 0, 0)
                    {
                        Ok(()) => report.close_posted += 1,
                        Err(err) => {
                            log::debug!("CallbackRegistry: Close post to HWND {hwnd:?} failed: {err}")
                        }
                    }
                }
                Ok(())
            }
            Err(err) if err.is_invalid_window_handle() => {
                log::debug!("CallbackRegistry: HWND {hwnd:?} already destroyed; nothing to neutralize.");
                report.skipped_invalid += 1;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
