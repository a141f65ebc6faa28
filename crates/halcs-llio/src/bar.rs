use crate::error::{LlioError, LlioResult};

/// A single mapped PCIe BAR region: a flat byte-addressable window.
///
/// Production code maps this onto `/sys/bus/pci/devices/<bdf>/resourceN` via
/// `mmap`; tests substitute an in-memory [`FakeBar`].
pub trait PcieBar: Send + std::any::Any {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, offset: usize, buf: &mut [u8]);

    fn write(&mut self, offset: usize, buf: &[u8]);

    fn as_any(&self) -> &dyn std::any::Any;
}

/// Maps and unmaps the three BARs a [`crate::pcie::PcieBackend`] needs.
///
/// Abstracted through a trait (rather than calling `mmap` directly from the
/// backend) so tests can substitute a fake mapper, the same way the source's
/// `dmngr_spawn_chld` hook is a function pointer swapped out in tests.
pub trait BarMapper: Send {
    fn map(&mut self, dev_entry: &str, bar_no: u8) -> LlioResult<Box<dyn PcieBar>>;

    fn unmap(&mut self, bar_no: u8, bar: Box<dyn PcieBar>) {
        let _ = (bar_no, bar);
    }
}

/// Real PCIe BAR mapper: `mmap`s the sysfs `resourceN` file for the device.
pub struct SysfsBarMapper;

impl SysfsBarMapper {
    pub fn new() -> Self {
        SysfsBarMapper
    }

    fn resource_path(dev_entry: &str, bar_no: u8) -> String {
        format!("{}/resource{}", dev_entry, bar_no)
    }
}

impl Default for SysfsBarMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl BarMapper for SysfsBarMapper {
    fn map(&mut self, dev_entry: &str, bar_no: u8) -> LlioResult<Box<dyn PcieBar>> {
        let path = Self::resource_path(dev_entry, bar_no);
        MmapBar::open(&path)
            .map(|bar| Box::new(bar) as Box<dyn PcieBar>)
            .map_err(|e| LlioError::Backend(format!("mmap {}: {}", path, e)))
    }

    fn unmap(&mut self, _bar_no: u8, _bar: Box<dyn PcieBar>) {
        // Dropping the boxed `MmapBar` calls `munmap` in its `Drop` impl.
    }
}

/// A BAR backed by a real `mmap`ed sysfs resource file.
pub struct MmapBar {
    addr: *mut u8,
    len: usize,
}

// SAFETY: the mapped region is exclusively owned by this `MmapBar` and all
// accesses go through `read`/`write`, which use volatile pointer operations.
unsafe impl Send for MmapBar {}

impl MmapBar {
    fn open(path: &str) -> std::io::Result<Self> {
        use std::ffi::CString;
        use std::os::unix::io::RawFd;

        let cpath = CString::new(path).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has embedded NUL")
        })?;

        // SAFETY: `cpath` is a valid, NUL-terminated string; `open` is a
        // plain libc syscall wrapper.
        let fd: RawFd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDWR | libc::O_SYNC) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut stat) } != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        let len = stat.st_size as usize;

        // SAFETY: `fd` is a valid, open file descriptor referencing a
        // sysfs resource file of size `len`.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };

        if addr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }

        Ok(MmapBar {
            addr: addr as *mut u8,
            len,
        })
    }
}

impl PcieBar for MmapBar {
    fn len(&self) -> usize {
        self.len
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        assert!(offset + buf.len() <= self.len, "BAR read out of bounds");
        // SAFETY: bounds checked above; the mapping is valid for `self.len`
        // bytes for the lifetime of `self`.
        unsafe {
            std::ptr::copy_nonoverlapping(self.addr.add(offset), buf.as_mut_ptr(), buf.len());
        }
    }

    fn write(&mut self, offset: usize, buf: &[u8]) {
        assert!(offset + buf.len() <= self.len, "BAR write out of bounds");
        // SAFETY: bounds checked above.
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), self.addr.add(offset), buf.len());
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for MmapBar {
    fn drop(&mut self) {
        // SAFETY: `self.addr`/`self.len` describe the exact mapping created
        // in `open`.
        unsafe {
            libc::munmap(self.addr as *mut libc::c_void, self.len);
        }
    }
}

/// An in-memory stand-in for a BAR, used by tests and by the [`crate::pcie`]
/// unit tests for the timeout detect-and-retry protocol.
pub struct FakeBar {
    mem: Vec<u8>,
    /// Number of subsequent reads that should return all-`0xFF`, simulating
    /// a PCIe core timeout, before real data is served again.
    pub timeout_reads_remaining: std::cell::Cell<u32>,
    /// Total writes seen by this BAR. When used as the fake BAR0 in tests
    /// (which in this system only ever receives the channel-reset write),
    /// this doubles as the channel-reset counter.
    pub channel_resets: std::cell::Cell<u32>,
}

impl FakeBar {
    pub fn new(len: usize) -> Self {
        FakeBar {
            mem: vec![0u8; len],
            timeout_reads_remaining: std::cell::Cell::new(0),
            channel_resets: std::cell::Cell::new(0),
        }
    }

    pub fn with_contents(data: Vec<u8>) -> Self {
        FakeBar {
            mem: data,
            timeout_reads_remaining: std::cell::Cell::new(0),
            channel_resets: std::cell::Cell::new(0),
        }
    }

    pub fn set_timeout_reads(&self, n: u32) {
        self.timeout_reads_remaining.set(n);
    }

    pub fn channel_resets(&self) -> u32 {
        self.channel_resets.get()
    }
}

impl PcieBar for FakeBar {
    fn len(&self) -> usize {
        self.mem.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        let remaining = self.timeout_reads_remaining.get();
        if remaining > 0 {
            self.timeout_reads_remaining.set(remaining - 1);
            buf.fill(0xFF);
            return;
        }
        buf.copy_from_slice(&self.mem[offset..offset + buf.len()]);
    }

    fn write(&mut self, offset: usize, buf: &[u8]) {
        self.mem[offset..offset + buf.len()].copy_from_slice(buf);
        self.channel_resets.set(self.channel_resets.get() + 1);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
