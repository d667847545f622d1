/// Best-effort protection for long-lived in-RAM secrets: pages are locked
/// against swapping and excluded from core dumps where the OS allows it.
/// Locking failure downgrades to a warning; the buffer still zeroizes on
/// drop either way.
use zeroize::Zeroize;

pub struct LockedBuf {
    data: Vec<u8>,
    locked: bool,
}

impl LockedBuf {
    pub fn new(data: Vec<u8>) -> Self {
        let locked = lock_region(&data);
        if !locked && !data.is_empty() {
            tracing::warn!("unable to lock secret memory; proceeding unlocked");
        }
        Self { data, locked }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Drop for LockedBuf {
    fn drop(&mut self) {
        if self.locked {
            unlock_region(&self.data);
        }
        self.data.zeroize();
    }
}

#[cfg(unix)]
fn lock_region(buf: &[u8]) -> bool {
    if buf.is_empty() {
        return false;
    }
    let ok = unsafe { libc::mlock(buf.as_ptr() as *const libc::c_void, buf.len()) == 0 };
    #[cfg(target_os = "linux")]
    if ok {
        // best effort; EINVAL on unaligned addresses is acceptable
        unsafe {
            libc::madvise(
                buf.as_ptr() as *mut libc::c_void,
                buf.len(),
                libc::MADV_DONTDUMP,
            );
        }
    }
    ok
}

#[cfg(unix)]
fn unlock_region(buf: &[u8]) {
    if buf.is_empty() {
        return;
    }
    unsafe {
        libc::munlock(buf.as_ptr() as *const libc::c_void, buf.len());
    }
}

#[cfg(not(unix))]
fn lock_region(_buf: &[u8]) -> bool {
    false
}

#[cfg(not(unix))]
fn unlock_region(_buf: &[u8]) {}
