use std::io::{self, Error};
use std::mem;
use std::ptr::{self, NonNull};

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

pub fn page_size() -> usize {
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        let size = info.dwPageSize as usize;
        if size == 0 {
            4096
        } else {
            size
        }
    }
}

pub fn map_anon(len: usize) -> io::Result<NonNull<u8>> {
    // MEM_RESERVE | MEM_COMMIT is required to actually get usable memory.
    let ptr = unsafe { VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };

    NonNull::new(ptr.cast::<u8>()).ok_or_else(Error::last_os_error)
}

pub unsafe fn unmap(ptr: NonNull<u8>, _len: usize) -> io::Result<()> {
    // MEM_RELEASE requires dwSize to be 0.
    if unsafe { VirtualFree(ptr.as_ptr().cast(), 0, MEM_RELEASE) } == 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}
