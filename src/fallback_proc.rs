/*
 * Memoizes the native default window procedure (`DefWindowProcA` / `DefWindowProcW`).
 * The addresses belong to a module that stays loaded for the life of the process,
 * so a successful lookup is cached forever. A failed lookup is not cached and the
 * null sentinel is handed back; the caller decides how fatal that is.
 */
use crate::platform::WindowPlatform;
use crate::types::{CharMode, ProcAddress};

use std::sync::OnceLock;

#[derive(Debug, Default)]
pub struct FallbackProcedureCache {
    ansi: OnceLock<ProcAddress>,
    unicode: OnceLock<ProcAddress>,
}

impl FallbackProcedureCache {
    pub const fn new() -> Self {
        Self {
            ansi: OnceLock::new(),
            unicode: OnceLock::new(),
        }
    }

    fn slot(&self, mode: CharMode) -> &OnceLock<ProcAddress> {
        match mode {
            CharMode::Ansi => &self.ansi,
            CharMode::Unicode => &self.unicode,
        }
    }

    pub fn get<P: WindowPlatform + ?Sized>(&self, platform: &P, mode: CharMode) -> ProcAddress {
        let slot = self.slot(mode);
        if let Some(address) = slot.get() {
            return *address;
        }

        match platform.resolve_default_proc(mode) {
            Some(address) if !address.is_null() => {
                log::debug!("FallbackProcedureCache: Resolved {mode:?} default procedure at {address:?}.");
                *slot.get_or_init(|| address)
            }
            _ => {
                log::error!("FallbackProcedureCache: Could not resolve the {mode:?} default procedure.");
                ProcAddress::NULL
            }
        }
    }

    pub fn cached(&self, mode: CharMode) -> Option<ProcAddress> {
        self.slot(mode).get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ANSI_DEFAULT, MockPlatform, PlatformCall, UNICODE_DEFAULT};

    fn resolve_count(platform: &MockPlatform, mode: CharMode) -> usize {
        platform
            .calls()
            .iter()
            .filter(|call| **call == PlatformCall::ResolveDefault(mode))
            .count()
    }

    #[test]
    fn resolves_each_mode_once() {
        // Arrange
        let platform = MockPlatform::new();
        let cache = FallbackProcedureCache::new();
        // Act
        let first = cache.get(&platform, CharMode::Unicode);
        let second = cache.get(&platform, CharMode::Unicode);
        let ansi = cache.get(&platform, CharMode::Ansi);
        // Assert
        assert_eq!(first, UNICODE_DEFAULT);
        assert_eq!(second, UNICODE_DEFAULT);
        assert_eq!(ansi, ANSI_DEFAULT);
        assert_eq!(resolve_count(&platform, CharMode::Unicode), 1);
        assert_eq!(resolve_count(&platform, CharMode::Ansi), 1);
    }

    #[test]
    fn failed_lookup_returns_null_and_is_retried() {
        let platform = MockPlatform::new();
        platform.set_defaults_resolvable(false);
        let cache = FallbackProcedureCache::new();

        assert!(cache.get(&platform, CharMode::Ansi).is_null());
        assert_eq!(cache.cached(CharMode::Ansi), None);

        platform.set_defaults_resolvable(true);
        assert_eq!(cache.get(&platform, CharMode::Ansi), ANSI_DEFAULT);
        assert_eq!(resolve_count(&platform, CharMode::Ansi), 2);
    }
}
