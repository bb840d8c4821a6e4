//! SIGPIPE masking for the write path (spec §4.2 "SIGPIPE").
//!
//! On platforms where writing to a channel whose peer has gone away raises
//! `SIGPIPE` (terminating the process by default), the writer masks the
//! signal for the duration of each write pass and restores the prior
//! disposition on exit, including the error path. This is the fallback the
//! design notes call for; a platform with a per-send "no signal" flag
//! should prefer that instead, but this crate targets a plain
//! `io::Read + io::Write` channel so it has no portable way to reach for
//! one.
#[cfg(unix)]
use std::mem;

#[cfg(unix)]
pub struct SigpipeGuard {
    old_mask: libc::sigset_t,
}

#[cfg(unix)]
impl SigpipeGuard {
    /// Blocks `SIGPIPE` on the calling thread until dropped.
    pub fn block() -> SigpipeGuard {
        unsafe {
            let mut new_mask: libc::sigset_t = mem::zeroed();
            let mut old_mask: libc::sigset_t = mem::zeroed();
            libc::sigemptyset(&mut new_mask);
            libc::sigaddset(&mut new_mask, libc::SIGPIPE);
            libc::pthread_sigmask(libc::SIG_BLOCK, &new_mask, &mut old_mask);
            SigpipeGuard { old_mask }
        }
    }
}

#[cfg(unix)]
impl Drop for SigpipeGuard {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.old_mask, ::std::ptr::null_mut());
        }
    }
}

#[cfg(not(unix))]
pub struct SigpipeGuard;

#[cfg(not(unix))]
impl SigpipeGuard {
    pub fn block() -> SigpipeGuard {
        SigpipeGuard
    }
}

#[cfg(all(test, unix))]
mod test {
    use super::*;

    #[test]
    fn block_and_restore_does_not_panic() {
        let guard = SigpipeGuard::block();
        drop(guard);
    }
}
