//! Process resource limits.

use std::io;

/// Raise the soft open-file limit to the hard limit.
///
/// Every connection holds a descriptor, so the usual soft default of 1024 is
/// far too low. Returns the `(previous, current)` soft limits.
///
/// # Errors
///
/// Returns the OS error if the limit cannot be read or changed.
pub fn raise_fd_limit() -> io::Result<(u64, u64)> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    // SAFETY: `limit` is a valid out-pointer for the duration of the call.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let previous = limit.rlim_cur as u64;
    if limit.rlim_cur >= limit.rlim_max {
        return Ok((previous, previous));
    }

    limit.rlim_cur = limit.rlim_max;
    // SAFETY: `limit` is a valid, initialized rlimit.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok((previous, limit.rlim_cur as u64))
}
