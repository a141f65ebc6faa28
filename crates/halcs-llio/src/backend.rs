use crate::endpoint::Endpoint;
use crate::error::{LlioError, LlioResult};

/// The operations a concrete transport must provide. [`crate::Llio`] is
/// generic over this trait object; the backend is selected once, at
/// construction, and never swapped afterward.
pub trait LlioBackend: Send {
    fn open(&mut self, endpoint: &Endpoint) -> LlioResult<()>;
    fn release(&mut self) -> LlioResult<()>;

    fn read_16(&mut self, offs: u64) -> LlioResult<u16> {
        let _ = offs;
        Err(LlioError::Unsupported)
    }
    fn write_16(&mut self, offs: u64, value: u16) -> LlioResult<()> {
        let _ = (offs, value);
        Err(LlioError::Unsupported)
    }

    fn read_32(&mut self, offs: u64) -> LlioResult<u32>;
    fn write_32(&mut self, offs: u64, value: u32) -> LlioResult<()>;

    fn read_64(&mut self, offs: u64) -> LlioResult<u64> {
        let lo = self.read_32(offs)? as u64;
        let hi = self.read_32(offs + 4)? as u64;
        Ok(lo | (hi << 32))
    }
    fn write_64(&mut self, offs: u64, value: u64) -> LlioResult<()> {
        self.write_32(offs, value as u32)?;
        self.write_32(offs + 4, (value >> 32) as u32)
    }

    fn read_block(&mut self, offs: u64, buf: &mut [u8]) -> LlioResult<usize>;
    fn write_block(&mut self, offs: u64, buf: &[u8]) -> LlioResult<usize>;

    fn read_dma(&mut self, offs: u64, buf: &mut [u8]) -> LlioResult<usize> {
        let _ = (offs, buf);
        Err(LlioError::Unsupported)
    }
    fn write_dma(&mut self, offs: u64, buf: &[u8]) -> LlioResult<usize> {
        let _ = (offs, buf);
        Err(LlioError::Unsupported)
    }
}
