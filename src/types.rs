/*
 * Platform-agnostic value types shared by the callback registry, the subclass
 * lifecycle and the Win32 glue. Native handles and procedure pointers are carried
 * as plain integers here so that the registry logic compiles and can be tested on
 * every host; `window_common` converts them to and from the `windows` crate types.
 */
use std::sync::atomic::{AtomicU64, Ordering};

/// Raw native window handle (`HWND`) as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct WindowHandle(pub isize);

impl WindowHandle {
    pub const NULL: WindowHandle = WindowHandle(0);

    pub const fn new(raw: isize) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> isize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Address of a native window procedure, as stored in `GWLP_WNDPROC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProcAddress(pub usize);

impl ProcAddress {
    pub const NULL: ProcAddress = ProcAddress(0);

    pub const fn raw(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Character mode of a window. Selects between the `A` and `W` entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharMode {
    Ansi,
    Unicode,
}

impl CharMode {
    pub const fn from_is_unicode(is_unicode: bool) -> Self {
        if is_unicode {
            CharMode::Unicode
        } else {
            CharMode::Ansi
        }
    }

    pub const fn is_unicode(self) -> bool {
        matches!(self, CharMode::Unicode)
    }
}

/*
 * Stable identity of one subclass attachment. Drawn from a process-wide counter
 * that starts at 1 and is never reused, so 0 stays free as the detach-message
 * wildcard.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubclassId(u64);

static NEXT_SUBCLASS_ID: AtomicU64 = AtomicU64::new(1);

impl SubclassId {
    pub fn next() -> Self {
        Self(NEXT_SUBCLASS_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Decodes the `wparam` of a detach message. `0` is the wildcard and maps to `None`.
    pub fn from_wparam(wparam: usize) -> Option<Self> {
        (wparam != 0).then_some(Self(wparam as u64))
    }

    pub const fn as_wparam(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle of the callback registry. `ShuttingDown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Open,
    ShuttingDown,
}

/*
 * Decoded payload of the detach control message.
 *
 * `wparam` selects the target: 0 addresses every managed subclass on the window,
 * anything else is a `SubclassId`. `lparam` selects the mode: 0 is a polite detach
 * (only honoured by the outermost procedure), 1 forces it, and 2 forces it and
 * forwards the message down the procedure chain so stacked subclasses see it too.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetachRequest {
    pub target: Option<SubclassId>,
    pub force: bool,
    pub forward: bool,
}

impl DetachRequest {
    pub const LPARAM_POLITE: isize = 0;
    pub const LPARAM_FORCE: isize = 1;
    pub const LPARAM_FORCE_AND_FORWARD: isize = 2;

    /// The request broadcast by the shutdown sweep: every subclass, forced, forwarded.
    pub const fn broadcast_force_and_forward() -> Self {
        Self {
            target: None,
            force: true,
            forward: true,
        }
    }

    pub const fn targeted(id: SubclassId, force: bool) -> Self {
        Self {
            target: Some(id),
            force,
            forward: false,
        }
    }

    pub fn decode(wparam: usize, lparam: isize) -> Self {
        Self {
            target: SubclassId::from_wparam(wparam),
            force: lparam >= Self::LPARAM_FORCE,
            forward: lparam >= Self::LPARAM_FORCE_AND_FORWARD,
        }
    }

    pub fn encode(self) -> (usize, isize) {
        let wparam = self.target.map(SubclassId::as_wparam).unwrap_or(0);
        let lparam = match (self.force, self.forward) {
            (_, true) => Self::LPARAM_FORCE_AND_FORWARD,
            (true, false) => Self::LPARAM_FORCE,
            (false, false) => Self::LPARAM_POLITE,
        };
        (wparam, lparam)
    }

    pub fn applies_to(&self, id: SubclassId) -> bool {
        self.target.is_none_or(|target| target == id)
    }
}

/// Counters describing what one shutdown sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Distinct windows the sweep touched.
    pub visited: usize,
    /// Windows whose procedure now points at the native default.
    pub neutralized: usize,
    pub detach_sent: usize,
    pub close_posted: usize,
    /// Windows whose handle was already invalid when the sweep reached them.
    pub skipped_invalid: usize,
    /// Entries registered after the snapshot and picked up by a re-sweep.
    pub late_registrations: usize,
}
