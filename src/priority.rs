//! Process scheduling priority

use std::io;

/// Set the niceness of this process (negative values need privileges)
#[cfg(unix)]
pub fn set_niceness(niceness: i32) -> io::Result<()> {
    // SAFETY: setpriority only reads its integer arguments
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, niceness) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
/// Always fails off unix
pub fn set_niceness(_niceness: i32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "niceness is a unix concept"))
}

/// Raise scheduling priority, logging instead of failing when not permitted
pub fn raise(niceness: i32) {
    match set_niceness(niceness) {
        Ok(()) => tracing::info!("Process niceness set to {}", niceness),
        Err(e) => tracing::warn!("Cannot set niceness {}: {}", niceness, e),
    }
}
