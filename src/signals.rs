use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Single-slot mailboxes shared between the button handler and the control
/// loop. Handlers only flip a flag; the loop consumes it once per tick with
/// an atomic swap, so a press is seen exactly once.
#[derive(Debug, Default)]
pub struct ButtonLatch {
    cancel: AtomicBool,
    reset: AtomicBool,
    presses: AtomicU64,
}

impl ButtonLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override button. Safe to call from interrupt-like context.
    pub fn press(&self) {
        self.cancel.swap(true, Ordering::AcqRel);
        self.presses.fetch_add(1, Ordering::Relaxed);
    }

    /// External fault reset (clears a persistent sensor fault).
    pub fn request_reset(&self) {
        self.reset.swap(true, Ordering::AcqRel);
    }

    pub fn take_cancel(&self) -> bool {
        self.cancel.swap(false, Ordering::AcqRel)
    }

    pub fn take_reset(&self) -> bool {
        self.reset.swap(false, Ordering::AcqRel)
    }

    pub fn press_count(&self) -> u64 {
        self.presses.load(Ordering::Relaxed)
    }
}
