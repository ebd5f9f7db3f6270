//! Mapped ring buffers with a wrap overhang
//!
//! Every producer/consumer edge in a flowing stream moves bytes through
//! one of these: a circular region of `map_len` bytes followed by an
//! `overhang` region that mirrors the first `overhang` bytes of the
//! buffer. A consumer may therefore take a contiguous slice of up to
//! `overhang` bytes starting anywhere in `[0, map_len)` without ever
//! branching on the wrap point.
//!
//! On Linux the mirror costs nothing: the buffer is a `memfd` mapped
//! twice back to back, so the overhang IS the head of the buffer. On
//! other targets a plain allocation is used and [`RingBuffer::publish`]
//! copies the affected bytes between the head and the overhang.
//!
//! # Synchronization
//!
//! The struct hands out raw slices without locking. This is sound under
//! the flow protocol: buffer sizing guarantees the writer's window and
//! every reader's window never overlap, and all cursor movement happens
//! under the stream mutex in the scheduler's reconcile step. No byte is
//! ever concurrently written and read.

use std::io;

/// Round `len` up to a multiple of `page` (a power of two).
fn round_up(len: usize, page: usize) -> usize {
    (len + page - 1) & !(page - 1)
}

pub struct RingBuffer {
    mem: *mut u8,
    map_len: usize,
    overhang: usize,
}

// The raw pointer is to memory this struct owns until Drop; concurrent
// access is governed by the flow protocol described in the module docs.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

#[cfg(target_os = "linux")]
fn page_size() -> usize {
    // SAFETY: sysconf is always callable.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(not(target_os = "linux"))]
fn page_size() -> usize {
    4096
}

impl RingBuffer {
    /// Map a ring of at least `map_len` usable bytes with at least
    /// `overhang` mirror bytes. Both lengths are rounded up to the page
    /// size; `overhang` must not exceed `map_len` after rounding.
    pub fn new(map_len: usize, overhang: usize) -> io::Result<Self> {
        let page = page_size();
        let map_len = round_up(map_len.max(1), page);
        let overhang = round_up(overhang.max(1), page).min(map_len);
        Self::map(map_len, overhang)
    }

    #[cfg(target_os = "linux")]
    fn map(map_len: usize, overhang: usize) -> io::Result<Self> {
        // memfd + two fixed mappings of the same pages: writes through
        // either view are visible in both, so the overhang mirrors the
        // head of the buffer with no copying.
        //
        // SAFETY: standard mmap choreography; every return value is
        // checked, and the reservation mapping guarantees the fixed
        // mappings land in address space we own.
        unsafe {
            let fd = libc::memfd_create(
                b"quickstream-ring\0".as_ptr().cast(),
                libc::MFD_CLOEXEC,
            );
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::ftruncate(fd, map_len as libc::off_t) != 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }

            // Reserve the whole range, then map the file over it twice.
            let total = map_len + overhang;
            let base = libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if base == libc::MAP_FAILED {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }

            let rw = libc::PROT_READ | libc::PROT_WRITE;
            let fixed = libc::MAP_SHARED | libc::MAP_FIXED;
            if libc::mmap(base, map_len, rw, fixed, fd, 0) == libc::MAP_FAILED
                || libc::mmap(
                    (base as *mut u8).add(map_len).cast(),
                    overhang,
                    rw,
                    fixed,
                    fd,
                    0,
                ) == libc::MAP_FAILED
            {
                let err = io::Error::last_os_error();
                libc::munmap(base, total);
                libc::close(fd);
                return Err(err);
            }

            // The mappings keep the pages alive; the fd is no longer
            // needed.
            libc::close(fd);

            Ok(Self {
                mem: base.cast(),
                map_len,
                overhang,
            })
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn map(map_len: usize, overhang: usize) -> io::Result<Self> {
        let layout = std::alloc::Layout::from_size_align(map_len + overhang, 64)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // SAFETY: layout has non-zero size.
        let mem = unsafe { std::alloc::alloc_zeroed(layout) };
        if mem.is_null() {
            return Err(io::Error::new(io::ErrorKind::OutOfMemory, "ring alloc failed"));
        }
        Ok(Self { mem, map_len, overhang })
    }

    /// Usable circular length in bytes.
    pub fn map_len(&self) -> usize {
        self.map_len
    }

    /// Length of the mirror region; the largest contiguous slice a
    /// caller may take.
    pub fn overhang(&self) -> usize {
        self.overhang
    }

    /// Contiguous read access to `len` bytes starting at `off`.
    ///
    /// # Safety
    ///
    /// `off < map_len`, `len <= overhang`, and the flow protocol must
    /// guarantee no concurrent writer touches `[off, off+len)`.
    pub unsafe fn slice(&self, off: usize, len: usize) -> &[u8] {
        debug_assert!(off < self.map_len);
        debug_assert!(len <= self.overhang);
        std::slice::from_raw_parts(self.mem.add(off), len)
    }

    /// Contiguous write access to `len` bytes starting at `off`.
    ///
    /// # Safety
    ///
    /// Same as [`Self::slice`], plus: no concurrent reader of the
    /// region, and exclusive writer access (one producer per port).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, off: usize, len: usize) -> &mut [u8] {
        debug_assert!(off < self.map_len);
        debug_assert!(len <= self.overhang);
        std::slice::from_raw_parts_mut(self.mem.add(off), len)
    }

    /// Make bytes written to `[off, off+len)` coherent with the mirror.
    /// A no-op with the double mapping; the fallback copies between the
    /// head and the overhang.
    #[cfg(target_os = "linux")]
    pub fn publish(&self, _off: usize, _len: usize) {}

    #[cfg(not(target_os = "linux"))]
    pub fn publish(&self, off: usize, len: usize) {
        let end = off + len;
        // Head bytes must appear in the overhang.
        if off < self.overhang {
            let n = end.min(self.overhang) - off;
            // SAFETY: both regions are inside our allocation and cannot
            // overlap (overhang <= map_len).
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.mem.add(off),
                    self.mem.add(self.map_len + off),
                    n,
                );
            }
        }
        // Overhang spill must appear at the head.
        if end > self.map_len {
            let n = end - self.map_len;
            unsafe {
                std::ptr::copy_nonoverlapping(self.mem.add(self.map_len), self.mem, n);
            }
        }
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        #[cfg(target_os = "linux")]
        // SAFETY: mem/map_len/overhang describe the mapping we created.
        unsafe {
            libc::munmap(self.mem.cast(), self.map_len + self.overhang);
        }
        #[cfg(not(target_os = "linux"))]
        // SAFETY: same layout as in map().
        unsafe {
            let layout =
                std::alloc::Layout::from_size_align_unchecked(self.map_len + self.overhang, 64);
            std::alloc::dealloc(self.mem, layout);
        }
    }
}
