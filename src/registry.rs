//! Process-wide table of live child pids.
//!
//! Controllers add a pid on spawn and remove it once shutdown finalizes.
//! If the test process itself is interrupted, the table is what lets an
//! interrupt handler reap children that would otherwise be orphaned.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::signal;

/// Registration interface a controller reports its child's pid to.
pub trait PidRegistry: Send + Sync {
    fn add(&self, pid: u32);
    fn remove(&self, pid: u32);
    fn pids(&self) -> Vec<u32>;
}

static LIVE_PIDS: Mutex<BTreeSet<u32>> = Mutex::new(BTreeSet::new());

fn live_pids() -> MutexGuard<'static, BTreeSet<u32>> {
    LIVE_PIDS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle on the process-wide pid table. The default for every controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalPidRegistry;

impl PidRegistry for GlobalPidRegistry {
    fn add(&self, pid: u32) {
        live_pids().insert(pid);
    }

    fn remove(&self, pid: u32) {
        live_pids().remove(&pid);
    }

    fn pids(&self) -> Vec<u32> {
        live_pids().iter().copied().collect()
    }
}

/// A registry scoped to its owner rather than the whole process.
#[derive(Debug, Default)]
pub struct LocalPidRegistry {
    pids: Mutex<BTreeSet<u32>>,
}

impl LocalPidRegistry {
    fn guard(&self) -> MutexGuard<'_, BTreeSet<u32>> {
        self.pids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PidRegistry for LocalPidRegistry {
    fn add(&self, pid: u32) {
        self.guard().insert(pid);
    }

    fn remove(&self, pid: u32) {
        self.guard().remove(&pid);
    }

    fn pids(&self) -> Vec<u32> {
        self.guard().iter().copied().collect()
    }
}

/// Send `sig` to every pid in `registry`. Returns how many were signalled.
///
/// Best effort: pids that are already gone or refuse the signal are
/// skipped and dropped from the table.
pub fn kill_registered(registry: &dyn PidRegistry, sig: i32) -> usize {
    let mut signalled = 0;
    for pid in registry.pids() {
        match signal::send(pid, sig) {
            Ok(true) => {
                debug!(pid, signal = sig, "signalled registered child");
                signalled += 1;
            }
            Ok(false) => registry.remove(pid),
            Err(e) => {
                warn!(pid, signal = sig, error = %e, "failed to signal registered child");
                registry.remove(pid);
            }
        }
    }
    signalled
}

/// Reap registered children with `SIGKILL` when the process gets Ctrl-C.
///
/// Exits with status 130 after reaping. Fails if a handler is already set.
pub fn install_interrupt_cleanup() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(|| {
        let killed = kill_registered(&GlobalPidRegistry, signal::SIGKILL);
        warn!(killed, "interrupted, reaped registered children");
        std::process::exit(130);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn local_registry_tracks_add_and_remove() {
        let reg = LocalPidRegistry::default();
        reg.add(42);
        reg.add(7);
        reg.add(42);
        assert_eq!(reg.pids(), vec![7, 42]);
        reg.remove(42);
        assert_eq!(reg.pids(), vec![7]);
        reg.remove(1000);
        assert_eq!(reg.pids(), vec![7]);
    }

    #[test]
    #[serial]
    fn global_registry_is_shared_between_handles() {
        let a = GlobalPidRegistry;
        let b = GlobalPidRegistry;
        a.add(999_001);
        assert!(b.pids().contains(&999_001));
        b.remove(999_001);
        assert!(!a.pids().contains(&999_001));
    }

    #[cfg(unix)]
    #[test]
    fn kill_registered_signals_live_and_prunes_dead() {
        let mut live = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let mut dead = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = dead.id();
        dead.wait().unwrap();

        let reg = LocalPidRegistry::default();
        reg.add(live.id());
        reg.add(dead_pid);

        assert_eq!(kill_registered(&reg, signal::SIGKILL), 1);
        assert_eq!(reg.pids(), vec![live.id()]);

        use std::os::unix::process::ExitStatusExt;
        let status = live.wait().unwrap();
        assert_eq!(status.signal(), Some(signal::SIGKILL));
    }
}
