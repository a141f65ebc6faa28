//! Polymorphic low-level register-access layer.
//!
//! [`Llio`] is the public handle: it owns an [`Endpoint`] and a boxed
//! [`LlioBackend`], and centrally enforces that no I/O reaches the backend
//! while the endpoint is closed. Concrete transports (currently just
//! [`pcie::PcieBackend`]) implement [`LlioBackend`] and know nothing about
//! the open/closed bookkeeping themselves.

pub mod addr;
pub mod backend;
pub mod bar;
pub mod endpoint;
pub mod error;
pub mod pcie;

pub use backend::LlioBackend;
pub use endpoint::{Endpoint, TransportKind};
pub use error::{LlioError, LlioResult};

/// Handle to a single hardware endpoint, dispatching to whatever
/// [`LlioBackend`] was selected at construction time.
pub struct Llio {
    endpoint: Endpoint,
    backend: Box<dyn LlioBackend>,
}

impl Llio {
    pub fn new(endpoint: Endpoint, backend: Box<dyn LlioBackend>) -> Self {
        Llio { endpoint, backend }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn open(&mut self) -> LlioResult<()> {
        self.backend.open(&self.endpoint)?;
        self.endpoint.set_opened(true);
        Ok(())
    }

    pub fn release(&mut self) -> LlioResult<()> {
        self.backend.release()?;
        self.endpoint.set_opened(false);
        Ok(())
    }

    fn ensure_open(&self) -> LlioResult<()> {
        if !self.endpoint.opened() {
            return Err(LlioError::ClosedEndpoint);
        }
        Ok(())
    }

    pub fn read_16(&mut self, offs: u64) -> LlioResult<u16> {
        self.ensure_open()?;
        self.backend.read_16(offs)
    }

    pub fn write_16(&mut self, offs: u64, value: u16) -> LlioResult<()> {
        self.ensure_open()?;
        self.backend.write_16(offs, value)
    }

    pub fn read_32(&mut self, offs: u64) -> LlioResult<u32> {
        self.ensure_open()?;
        self.backend.read_32(offs)
    }

    pub fn write_32(&mut self, offs: u64, value: u32) -> LlioResult<()> {
        self.ensure_open()?;
        self.backend.write_32(offs, value)
    }

    pub fn read_64(&mut self, offs: u64) -> LlioResult<u64> {
        self.ensure_open()?;
        self.backend.read_64(offs)
    }

    pub fn write_64(&mut self, offs: u64, value: u64) -> LlioResult<()> {
        self.ensure_open()?;
        self.backend.write_64(offs, value)
    }

    pub fn read_block(&mut self, offs: u64, buf: &mut [u8]) -> LlioResult<usize> {
        self.ensure_open()?;
        self.backend.read_block(offs, buf)
    }

    pub fn write_block(&mut self, offs: u64, buf: &[u8]) -> LlioResult<usize> {
        self.ensure_open()?;
        self.backend.write_block(offs, buf)
    }

    pub fn read_dma(&mut self, offs: u64, buf: &mut [u8]) -> LlioResult<usize> {
        self.ensure_open()?;
        self.backend.read_dma(offs, buf)
    }

    pub fn write_dma(&mut self, offs: u64, buf: &[u8]) -> LlioResult<usize> {
        self.ensure_open()?;
        self.backend.write_dma(offs, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal in-memory backend used to test `Llio` itself, independent of
    /// the PCIe timeout/paging machinery.
    struct ModelBackend {
        mem: std::collections::HashMap<u64, u32>,
        opened: bool,
    }

    impl ModelBackend {
        fn new() -> Self {
            ModelBackend {
                mem: std::collections::HashMap::new(),
                opened: false,
            }
        }
    }

    impl LlioBackend for ModelBackend {
        fn open(&mut self, _endpoint: &Endpoint) -> LlioResult<()> {
            self.opened = true;
            Ok(())
        }

        fn release(&mut self) -> LlioResult<()> {
            self.opened = false;
            Ok(())
        }

        fn read_32(&mut self, offs: u64) -> LlioResult<u32> {
            Ok(*self.mem.get(&offs).unwrap_or(&0))
        }

        fn write_32(&mut self, offs: u64, value: u32) -> LlioResult<()> {
            self.mem.insert(offs, value);
            Ok(())
        }

        fn read_block(&mut self, offs: u64, buf: &mut [u8]) -> LlioResult<usize> {
            for (i, b) in buf.iter_mut().enumerate() {
                let word = self.read_32(offs + i as u64)?;
                *b = word as u8;
            }
            Ok(buf.len())
        }

        fn write_block(&mut self, offs: u64, buf: &[u8]) -> LlioResult<usize> {
            for (i, b) in buf.iter().enumerate() {
                self.write_32(offs + i as u64, *b as u32)?;
            }
            Ok(buf.len())
        }
    }

    fn make_llio() -> Llio {
        let endpoint = Endpoint::new(TransportKind::Pcie, "model0");
        Llio::new(endpoint, Box::new(ModelBackend::new()))
    }

    #[test]
    fn closed_llio_rejects_all_io() {
        let mut llio = make_llio();
        assert_eq!(llio.read_32(0x10).unwrap_err(), LlioError::ClosedEndpoint);
        assert_eq!(
            llio.write_32(0x10, 1).unwrap_err(),
            LlioError::ClosedEndpoint
        );
        assert!(!llio.endpoint().opened());
    }

    #[test]
    fn open_then_round_trip_single_word() {
        let mut llio = make_llio();
        llio.open().unwrap();
        assert!(llio.endpoint().opened());

        llio.write_32(0x10, 0xDEADBEEF).unwrap();
        assert_eq!(llio.read_32(0x10).unwrap(), 0xDEADBEEF);
    }

    #[test]
    fn release_closes_endpoint_and_blocks_io_again() {
        let mut llio = make_llio();
        llio.open().unwrap();
        llio.write_32(0x10, 1).unwrap();
        llio.release().unwrap();

        assert!(!llio.endpoint().opened());
        assert_eq!(llio.read_32(0x10).unwrap_err(), LlioError::ClosedEndpoint);
    }
}
