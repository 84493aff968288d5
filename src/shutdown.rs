/*
 * Wires the registry's shutdown sweep to a "runtime is about to terminate"
 * notification. The trigger moves NotSubscribed -> Subscribed -> Fired; firing is
 * guarded so a repeated notification never runs a second sweep.
 *
 * The notification source is abstract (`ExitNotifier`). `ProcessExitHook` is the
 * in-process source: the host calls `notify` from the last point at which hosted
 * callbacks may still run, e.g. the end of `main` or a DLL_PROCESS_DETACH handler.
 */
use crate::error::{PlatformError, Result as PlatformResult};
use crate::platform::WindowPlatform;
use crate::registry::CallbackRegistry;
use crate::types::SweepReport;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub type ExitHandler = Box<dyn FnOnce() + Send + 'static>;

pub trait ExitNotifier {
    fn subscribe(&self, handler: ExitHandler) -> PlatformResult<()>;
}

/// One-shot exit notification raised explicitly by the host.
#[derive(Default)]
pub struct ProcessExitHook {
    handlers: Mutex<Vec<ExitHandler>>,
}

impl ProcessExitHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs and drops every handler subscribed so far. Returns how many ran.
    pub fn notify(&self) -> usize {
        let handlers: Vec<ExitHandler> = std::mem::take(
            &mut *self
                .handlers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let count = handlers.len();
        log::debug!("ProcessExitHook: Delivering exit notification to {count} handler(s).");
        for handler in handlers {
            handler();
        }
        count
    }
}

impl ExitNotifier for ProcessExitHook {
    fn subscribe(&self, handler: ExitHandler) -> PlatformResult<()> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TriggerState {
    NotSubscribed = 0,
    Subscribed = 1,
    Fired = 2,
}

impl TriggerState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => TriggerState::NotSubscribed,
            1 => TriggerState::Subscribed,
            _ => TriggerState::Fired,
        }
    }
}

pub struct ShutdownTrigger<P: WindowPlatform + 'static> {
    registry: Arc<CallbackRegistry<P>>,
    state: AtomicU8,
}

impl<P: WindowPlatform + 'static> ShutdownTrigger<P> {
    pub fn new(registry: Arc<CallbackRegistry<P>>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            state: AtomicU8::new(TriggerState::NotSubscribed as u8),
        })
    }

    pub fn state(&self) -> TriggerState {
        TriggerState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry<P>> {
        &self.registry
    }

    pub fn subscribe(self: &Arc<Self>, notifier: &dyn ExitNotifier) -> PlatformResult<()> {
        if self
            .state
            .compare_exchange(
                TriggerState::NotSubscribed as u8,
                TriggerState::Subscribed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(PlatformError::OperationFailed(format!(
                "ShutdownTrigger cannot subscribe in state {:?}",
                self.state()
            )));
        }

        let trigger = Arc::clone(self);
        let subscribed = notifier.subscribe(Box::new(move || trigger.on_exit_notification()));
        if let Err(err) = &subscribed {
            log::error!("ShutdownTrigger: Exit notification subscription failed: {err}");
            self.state
                .store(TriggerState::NotSubscribed as u8, Ordering::Release);
        } else {
            log::debug!("ShutdownTrigger: Subscribed to exit notification.");
        }
        subscribed
    }

    /// Runs the sweep unless it already ran. `None` means this call was the repeat.
    pub fn fire(&self) -> Option<PlatformResult<SweepReport>> {
        let previous = self
            .state
            .swap(TriggerState::Fired as u8, Ordering::AcqRel);
        if TriggerState::from_raw(previous) == TriggerState::Fired {
            log::debug!("ShutdownTrigger: Exit notification already handled.");
            return None;
        }
        Some(self.registry.shutdown_sweep())
    }

    fn on_exit_notification(&self) {
        if let Some(Err(err)) = self.fire() {
            log::error!("ShutdownTrigger: Window procedure sweep failed: {err}");
            panic!("window procedure sweep failed during shutdown: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockPlatform, ORIGINAL_PROC, UNICODE_DEFAULT};
    use crate::types::{CharMode, RegistryState, SubclassId, WindowHandle};

    fn registry_with_window(hwnd: WindowHandle) -> Arc<CallbackRegistry<MockPlatform>> {
        let registry = Arc::new(CallbackRegistry::new(MockPlatform::new()));
        registry
            .platform()
            .add_window(hwnd, false, CharMode::Unicode, ORIGINAL_PROC);
        registry.register(SubclassId::next(), hwnd);
        registry
    }

    #[test]
    fn exit_notification_runs_sweep_once() {
        // Arrange
        let hwnd = WindowHandle::new(0x40);
        let registry = registry_with_window(hwnd);
        let trigger = ShutdownTrigger::new(Arc::clone(&registry));
        let hook = ProcessExitHook::new();
        trigger.subscribe(&hook).expect("subscribe should succeed");
        assert_eq!(trigger.state(), TriggerState::Subscribed);
        // Act
        let delivered = hook.notify();
        // Assert
        assert_eq!(delivered, 1);
        assert_eq!(trigger.state(), TriggerState::Fired);
        assert_eq!(registry.platform().proc_of(hwnd), Some(UNICODE_DEFAULT));
        assert!(trigger.fire().is_none());
    }

    #[test]
    fn subscribed_trigger_does_nothing_until_notified() {
        let hwnd = WindowHandle::new(0x41);
        let registry = registry_with_window(hwnd);
        let trigger = ShutdownTrigger::new(Arc::clone(&registry));
        let hook = ProcessExitHook::new();

        trigger.subscribe(&hook).unwrap();
        drop(trigger);

        assert_eq!(registry.state(), RegistryState::Open);
        assert_eq!(registry.platform().proc_of(hwnd), Some(ORIGINAL_PROC));
    }

    #[test]
    fn second_subscription_is_rejected() {
        let registry = Arc::new(CallbackRegistry::new(MockPlatform::new()));
        let trigger = ShutdownTrigger::new(registry);
        let hook = ProcessExitHook::new();

        trigger.subscribe(&hook).unwrap();
        let second = trigger.subscribe(&hook);

        assert!(second.is_err());
        assert_eq!(hook.notify(), 1);
    }

    #[test]
    fn direct_fire_without_subscription_runs_sweep() {
        let hwnd = WindowHandle::new(0x41);
        let registry = registry_with_window(hwnd);
        let trigger = ShutdownTrigger::new(Arc::clone(&registry));

        let report = trigger
            .fire()
            .expect("first fire runs the sweep")
            .expect("sweep should succeed");

        assert_eq!(report.neutralized, 1);
        assert_eq!(trigger.state(), TriggerState::Fired);
    }

    #[test]
    fn fired_trigger_cannot_subscribe() {
        let registry = Arc::new(CallbackRegistry::new(MockPlatform::new()));
        let trigger = ShutdownTrigger::new(registry);
        let _ = trigger.fire();

        assert!(trigger.subscribe(&ProcessExitHook::new()).is_err());
    }

    struct RefusingNotifier;

    impl ExitNotifier for RefusingNotifier {
        fn subscribe(&self, _handler: ExitHandler) -> PlatformResult<()> {
            Err(PlatformError::InitializationFailed("no exit source".into()))
        }
    }

    #[test]
    fn failed_subscription_rolls_back_state() {
        let registry = Arc::new(CallbackRegistry::new(MockPlatform::new()));
        let trigger = ShutdownTrigger::new(registry);

        assert!(trigger.subscribe(&RefusingNotifier).is_err());
        assert_eq!(trigger.state(), TriggerState::NotSubscribed);
    }

    #[test]
    #[should_panic(expected = "window procedure sweep failed")]
    fn fatal_sweep_failure_fails_loudly_from_notification() {
        let hwnd = WindowHandle::new(0x42);
        let registry = registry_with_window(hwnd);
        registry.platform().fail_set_proc(hwnd, 5);
        let trigger = ShutdownTrigger::new(registry);
        let hook = ProcessExitHook::new();
        trigger.subscribe(&hook).unwrap();

        hook.notify();
    }
}
