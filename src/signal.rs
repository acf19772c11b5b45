//! Interrupt handling
//!
//! The first SIGINT/SIGTERM cancels the running apply: steps in flight
//! finish and are recorded, no new step starts. A second one exits at once.

use declarative::CancelToken;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

static TOKEN: OnceLock<CancelToken> = OnceLock::new();
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install the handlers and return the token they cancel
pub fn install() -> CancelToken {
    let token = TOKEN.get_or_init(CancelToken::new).clone();
    register();
    token
}

#[cfg(unix)]
fn register() {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

#[cfg(not(unix))]
fn register() {
    log::debug!("Interrupt handling not supported on this platform");
}

#[cfg(unix)]
extern "C" fn on_signal(_signal: libc::c_int) {
    if INTERRUPTED.swap(true, Ordering::SeqCst) {
        unsafe { libc::_exit(130) };
    }
    if let Some(token) = TOKEN.get() {
        token.cancel();
    }
}

/// Whether an interrupt has been received
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}
