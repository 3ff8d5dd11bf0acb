use std::io::{self, Error};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns the system page size, cached atomically.
pub fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
            PAGE_SIZE.store(page_size, Ordering::Relaxed);
            page_size
        }
        page_size => page_size,
    }
}

pub fn map_anon(len: usize) -> io::Result<NonNull<u8>> {
    let flags = libc::MAP_PRIVATE | libc::MAP_ANON;
    let prot = libc::PROT_READ | libc::PROT_WRITE;

    let ptr = unsafe { libc::mmap(ptr::null_mut(), len, prot, flags, -1, 0) };

    if ptr == libc::MAP_FAILED {
        return Err(Error::last_os_error());
    }

    // mmap never hands out the zero page on success.
    NonNull::new(ptr.cast::<u8>()).ok_or_else(Error::last_os_error)
}

pub unsafe fn unmap(ptr: NonNull<u8>, len: usize) -> io::Result<()> {
    if unsafe { libc::munmap(ptr.as_ptr().cast::<libc::c_void>(), len) } == -1 {
        return Err(Error::last_os_error());
    }
    Ok(())
}
