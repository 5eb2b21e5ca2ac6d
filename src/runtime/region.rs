//! Reserved virtual address ranges with incremental commit.
//!
//! A [`VirtualRegion`] maps its whole range `PROT_NONE` up front, so the
//! addresses are stable but cost no physical memory. Sub-ranges are made
//! readable and writable with [`VirtualRegion::commit`] as they are needed.
//! The whole mapping is released when the region is dropped.

#[cfg(not(unix))]
compile_error!("isojit runtime regions are only implemented for unix hosts");

use std::io;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

/// Returns the host page size.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf has no memory-safety preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let size = match usize::try_from(size) {
            Ok(size) if size > 0 => size,
            _ => panic!("sysconf(_SC_PAGESIZE) failed: {}", io::Error::last_os_error()),
        };
        assert!(size.is_power_of_two(), "host page size {} is not a power of two", size);
        size
    })
}

/// Rounds `len` up to a multiple of the host page size.
pub fn round_up_to_page(len: usize) -> usize {
    let page = page_size();
    len.checked_add(page - 1)
        .expect("integer overflow while rounding to page size")
        & !(page - 1)
}

/// A reserved, initially inaccessible range of virtual memory
pub struct VirtualRegion {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the region owns its mapping; callers synchronize access to the
// committed bytes themselves.
unsafe impl Send for VirtualRegion {}
// SAFETY: `commit` only changes page protections, which the kernel serializes.
unsafe impl Sync for VirtualRegion {}

impl VirtualRegion {
    /// Reserve at least `len` bytes of address space without backing them.
    pub fn reserve(len: usize) -> io::Result<Self> {
        let len = round_up_to_page(len.max(1));

        // SAFETY: anonymous private mapping with no fixed address.
        let mmap = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if mmap == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let base = NonNull::new(mmap.cast::<u8>()).ok_or_else(io::Error::last_os_error)?;
        Ok(Self { base, len })
    }

    /// Make `[offset, offset + len)` readable and writable.
    ///
    /// Both `offset` and `len` must be page aligned and inside the region.
    /// Freshly committed pages read as zero.
    pub fn commit(&self, offset: usize, len: usize) -> io::Result<()> {
        let page = page_size();
        assert_eq!(offset & (page - 1), 0, "commit offset {:#x} is not page aligned", offset);
        assert_eq!(len & (page - 1), 0, "commit length {:#x} is not page aligned", len);
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "commit of {:#x}..+{:#x} is outside the {:#x} byte region",
            offset,
            len,
            self.len
        );

        // SAFETY: the range was checked to lie inside our own mapping.
        let rc = unsafe {
            libc::mprotect(
                self.base.as_ptr().add(offset).cast(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for VirtualRegion {
    fn drop(&mut self) {
        // SAFETY: we own the mapping and nothing can reference it past drop.
        let ret = unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
        debug_assert_eq!(ret, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_rounds_to_page() {
        let region = VirtualRegion::reserve(1).unwrap();
        assert_eq!(region.len(), page_size());
        assert!(!region.is_empty());
    }

    #[test]
    fn test_committed_pages_are_zeroed_and_writable() {
        let page = page_size();
        let region = VirtualRegion::reserve(4 * page).unwrap();
        region.commit(page, page).unwrap();

        let bytes = unsafe {
            std::slice::from_raw_parts_mut(region.base().as_ptr().add(page), page)
        };
        assert!(bytes.iter().all(|&b| b == 0));
        bytes[0] = 0xAB;
        bytes[page - 1] = 0xCD;
        assert_eq!(bytes[0], 0xAB);
        assert_eq!(bytes[page - 1], 0xCD);
    }

    #[test]
    fn test_commit_is_repeatable() {
        let page = page_size();
        let region = VirtualRegion::reserve(page).unwrap();
        region.commit(0, page).unwrap();
        region.commit(0, page).unwrap();
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_commit_out_of_range_panics() {
        let page = page_size();
        let region = VirtualRegion::reserve(page).unwrap();
        let _ = region.commit(page, page);
    }

    #[test]
    fn test_page_size_matches_host() {
        let expected = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        assert!(expected > 0);
        assert_eq!(page_size(), expected as usize);
        assert!(page_size().is_power_of_two());
    }

    #[test]
    fn test_round_up_to_page() {
        let page = page_size();
        assert_eq!(round_up_to_page(0), 0);
        assert_eq!(round_up_to_page(1), page);
        assert_eq!(round_up_to_page(page), page);
        assert_eq!(round_up_to_page(page + 1), 2 * page);
    }
}
