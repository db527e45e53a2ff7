use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Busy/error indicators shared by every command issued through one client.
///
/// `busy` is set for exactly the lifetime of an exchange that counts towards it.
/// `error` is latched by transport and timeout failures and cleared by the next
/// successful exchange.
#[derive(Clone, Default)]
pub struct Session {
    flags: Arc<SessionFlags>,
}

#[derive(Default)]
struct SessionFlags {
    busy: AtomicBool,
    error: AtomicBool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.flags.busy.load(Ordering::SeqCst)
    }

    pub fn has_error(&self) -> bool {
        self.flags.error.load(Ordering::SeqCst)
    }

    pub(crate) fn latch_error(&self) {
        self.flags.error.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_error(&self) {
        self.flags.error.store(false, Ordering::SeqCst);
    }

    pub(crate) fn busy_guard(&self, counts_as_busy: bool) -> BusyGuard {
        if counts_as_busy {
            self.flags.busy.store(true, Ordering::SeqCst);
            BusyGuard {
                session: Some(self.clone()),
            }
        } else {
            BusyGuard { session: None }
        }
    }
}

pub(crate) struct BusyGuard {
    session: Option<Session>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.flags.busy.store(false, Ordering::SeqCst);
        }
    }
}
