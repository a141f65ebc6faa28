use crate::addr::{self, BAR0NO, BAR2NO, BAR4NO};
use crate::backend::LlioBackend;
use crate::bar::{BarMapper, PcieBar};
use crate::endpoint::Endpoint;
use crate::error::{LlioError, LlioResult};

/// Number of in-a-row `0xFF` bytes that indicate a PCIe core timeout rather
/// than legitimate all-ones data.
pub const PCIE_TIMEOUT_PATT_SIZE: usize = 32;
/// Maximum number of reset+retry cycles before a block transfer gives up.
pub const PCIE_TIMEOUT_MAX_TRIES: u32 = 32;
/// Sleep between a channel reset and the retry, in microseconds.
pub const PCIE_TIMEOUT_WAIT_US: u64 = 100_000;

/// Offset, inside BAR0, of the TX control register.
pub const PCIE_CFG_REG_TX_CTRL: u64 = 0x0010;
/// Value written to `PCIE_CFG_REG_TX_CTRL` to reset the channel.
pub const PCIE_CFG_TX_CTRL_CHANNEL_RST: u32 = 0x0000_0001;

fn is_timeout_pattern(buf: &[u8]) -> bool {
    buf.len() >= PCIE_TIMEOUT_PATT_SIZE && buf[..PCIE_TIMEOUT_PATT_SIZE].iter().all(|&b| b == 0xFF)
}

/// LLIO backend over three memory-mapped PCIe BARs: BAR0 (configuration and
/// timeout-reset registers), BAR2 (a paged SDRAM window) and BAR4 (a paged
/// Wishbone window).
pub struct PcieBackend {
    mapper: Box<dyn BarMapper>,
    dev_entry: String,
    sdram_pg_size: u32,
    wb_pg_size: u32,
    bar0: Option<Box<dyn PcieBar>>,
    bar2: Option<Box<dyn PcieBar>>,
    bar4: Option<Box<dyn PcieBar>>,
    cur_sdram_pg: Option<u32>,
    cur_wb_pg: Option<u32>,
}

impl PcieBackend {
    pub fn new(mapper: Box<dyn BarMapper>, sdram_pg_size: u32, wb_pg_size: u32) -> Self {
        PcieBackend {
            mapper,
            dev_entry: String::new(),
            sdram_pg_size,
            wb_pg_size,
            bar0: None,
            bar2: None,
            bar4: None,
            cur_sdram_pg: None,
            cur_wb_pg: None,
        }
    }

    fn bar0_mut(&mut self) -> LlioResult<&mut (dyn PcieBar + 'static)> {
        self.bar0
            .as_deref_mut()
            .ok_or(LlioError::ClosedEndpoint)
    }

    fn set_sdram_page(&mut self, page: u32) -> LlioResult<()> {
        if self.cur_sdram_pg == Some(page) {
            return Ok(());
        }
        self.cur_sdram_pg = Some(page);
        // The page-select register lives at a fixed offset in BAR0 in the
        // original hardware; here we model it as backend-internal state
        // rather than a register write, since the window itself is modeled
        // as a flat buffer already addressed by absolute page*pg_size+offset.
        Ok(())
    }

    fn set_wb_page(&mut self, page: u32) -> LlioResult<()> {
        if self.cur_wb_pg == Some(page) {
            return Ok(());
        }
        self.cur_wb_pg = Some(page);
        Ok(())
    }

    fn channel_reset(&mut self) -> LlioResult<()> {
        log::trace!("[llio:pcie] channel reset");
        let reg = self.bar0_mut()?;
        reg.write(
            PCIE_CFG_REG_TX_CTRL as usize,
            &PCIE_CFG_TX_CTRL_CHANNEL_RST.to_le_bytes(),
        );
        Ok(())
    }

    fn rw_32_bar0(&mut self, intra_offs: u64, data: &mut u32, write: bool) -> LlioResult<()> {
        let bar = self.bar0_mut()?;
        let off = intra_offs as usize;
        if write {
            bar.write(off, &data.to_le_bytes());
        } else {
            let mut tmp = [0u8; 4];
            bar.read(off, &mut tmp);
            *data = u32::from_le_bytes(tmp);
        }
        Ok(())
    }

    fn rw_32_windowed(
        &mut self,
        bar_no: u8,
        pg_num: u32,
        pg_offs: u64,
        pg_size: u32,
        data: &mut u32,
        write: bool,
    ) -> LlioResult<()> {
        if bar_no == BAR2NO {
            self.set_sdram_page(pg_num)?;
        } else {
            self.set_wb_page(pg_num)?;
        }

        let bar = if bar_no == BAR2NO {
            self.bar2.as_deref_mut().ok_or(LlioError::ClosedEndpoint)?
        } else {
            self.bar4.as_deref_mut().ok_or(LlioError::ClosedEndpoint)?
        };

        let flat_offset = pg_num as usize * pg_size as usize + pg_offs as usize;
        if write {
            bar.write(flat_offset, &data.to_le_bytes());
        } else {
            let mut tmp = [0u8; 4];
            bar.read(flat_offset, &mut tmp);
            *data = u32::from_le_bytes(tmp);
        }
        Ok(())
    }

    fn rw_32(&mut self, offs: u64, data: &mut u32, write: bool) -> LlioResult<()> {
        let bar_no = addr::bar_of(offs);
        let intra = addr::intra_offset(offs);

        match bar_no {
            BAR0NO => self.rw_32_bar0(intra, data, write),
            BAR2NO => {
                let (pg, pg_offs) = addr::split_page(intra, self.sdram_pg_size);
                self.rw_32_windowed(BAR2NO, pg, pg_offs, self.sdram_pg_size, data, write)
            }
            BAR4NO => {
                let (pg, pg_offs) = addr::split_page(intra, self.wb_pg_size);
                self.rw_32_windowed(BAR4NO, pg, pg_offs, self.wb_pg_size, data, write)
            }
            _ => Err(LlioError::BadArgument(format!("invalid BAR selector {}", bar_no))),
        }
    }

    /// Split `size` bytes starting at `(pg_start, pg_offs)` into per-page
    /// chunks, never crossing a page boundary. Returns `(page, page_offset,
    /// chunk_len)` tuples in order.
    fn plan_chunks(pg_start: u32, pg_offs: u64, size: usize, pg_size: u32) -> Vec<(u32, u64, usize)> {
        let pg_size = pg_size as u64;
        let mut chunks = Vec::new();
        let mut remaining = size as u64;
        let mut offs = pg_offs;
        let mut pg = pg_start;

        while remaining > 0 {
            let room = pg_size - offs;
            let this_chunk = room.min(remaining);
            chunks.push((pg, offs, this_chunk as usize));
            remaining -= this_chunk;
            offs = 0;
            pg += 1;
        }

        chunks
    }

    fn rw_block_raw(
        &mut self,
        bar_no: u8,
        pg_start: u32,
        pg_offs: u64,
        buf: &mut [u8],
        pg_size: u32,
        write: bool,
    ) -> LlioResult<usize> {
        let chunks = Self::plan_chunks(pg_start, pg_offs, buf.len(), pg_size);
        let mut done = 0usize;

        for (pg, off, len) in chunks {
            if bar_no == BAR2NO {
                self.set_sdram_page(pg)?;
            } else {
                self.set_wb_page(pg)?;
            }

            let bar = if bar_no == BAR2NO {
                self.bar2.as_deref_mut().ok_or(LlioError::ClosedEndpoint)?
            } else {
                self.bar4.as_deref_mut().ok_or(LlioError::ClosedEndpoint)?
            };

            let flat_offset = pg as usize * pg_size as usize + off as usize;
            let slice = &mut buf[done..done + len];
            if write {
                bar.write(flat_offset, slice);
            } else {
                bar.read(flat_offset, slice);
            }
            done += len;
        }

        Ok(done)
    }

    fn rw_block_with_timeout_detect(
        &mut self,
        bar_no: u8,
        pg_start: u32,
        pg_offs: u64,
        buf: &mut [u8],
        pg_size: u32,
        write: bool,
    ) -> LlioResult<usize> {
        let mut tries = 0;
        loop {
            let n = self.rw_block_raw(bar_no, pg_start, pg_offs, buf, pg_size, write)?;

            // Writes carry no timeout detection: the hardware gives us no
            // signal on a write-path timeout at this layer.
            if write || !is_timeout_pattern(buf) {
                return Ok(n);
            }

            tries += 1;
            if tries >= PCIE_TIMEOUT_MAX_TRIES {
                return Err(LlioError::TimeoutUnrecoverable { tries });
            }

            log::debug!("[llio:pcie] timeout pattern detected, resetting and retrying (try {})", tries);
            self.channel_reset()?;
            std::thread::sleep(std::time::Duration::from_micros(PCIE_TIMEOUT_WAIT_US));
        }
    }

    fn rw_block(&mut self, offs: u64, buf: &mut [u8], write: bool) -> LlioResult<usize> {
        let bar_no = addr::bar_of(offs);
        let intra = addr::intra_offset(offs);

        match bar_no {
            BAR0NO => Err(LlioError::Unsupported),
            BAR2NO => {
                let (pg, pg_offs) = addr::split_page(intra, self.sdram_pg_size);
                self.rw_block_with_timeout_detect(BAR2NO, pg, pg_offs, buf, self.sdram_pg_size, write)
            }
            BAR4NO => {
                let (pg, pg_offs) = addr::split_page(intra, self.wb_pg_size);
                self.rw_block_with_timeout_detect(BAR4NO, pg, pg_offs, buf, self.wb_pg_size, write)
            }
            _ => Err(LlioError::BadArgument(format!("invalid BAR selector {}", bar_no))),
        }
    }
}

impl LlioBackend for PcieBackend {
    fn open(&mut self, endpoint: &Endpoint) -> LlioResult<()> {
        if endpoint.opened() {
            return Ok(());
        }

        self.dev_entry = endpoint.name().to_string();

        let bar0 = self.mapper.map(&self.dev_entry, BAR0NO);
        let bar0 = match bar0 {
            Ok(b) => b,
            Err(e) => return Err(e),
        };

        let bar2 = self.mapper.map(&self.dev_entry, BAR2NO);
        let bar2 = match bar2 {
            Ok(b) => b,
            Err(e) => {
                self.mapper.unmap(BAR0NO, bar0);
                return Err(e);
            }
        };

        let bar4 = self.mapper.map(&self.dev_entry, BAR4NO);
        let bar4 = match bar4 {
            Ok(b) => b,
            Err(e) => {
                self.mapper.unmap(BAR2NO, bar2);
                self.mapper.unmap(BAR0NO, bar0);
                return Err(e);
            }
        };

        self.bar0 = Some(bar0);
        self.bar2 = Some(bar2);
        self.bar4 = Some(bar4);
        self.cur_sdram_pg = Some(0);
        self.cur_wb_pg = Some(0);

        log::info!("[llio:pcie] opened PCIe device at {}", self.dev_entry);
        Ok(())
    }

    fn release(&mut self) -> LlioResult<()> {
        if let Some(bar) = self.bar4.take() {
            self.mapper.unmap(BAR4NO, bar);
        }
        if let Some(bar) = self.bar2.take() {
            self.mapper.unmap(BAR2NO, bar);
        }
        if let Some(bar) = self.bar0.take() {
            self.mapper.unmap(BAR0NO, bar);
        }
        self.cur_sdram_pg = None;
        self.cur_wb_pg = None;
        Ok(())
    }

    fn read_32(&mut self, offs: u64) -> LlioResult<u32> {
        let mut data = 0u32;
        self.rw_32(offs, &mut data, false)?;
        Ok(data)
    }

    fn write_32(&mut self, offs: u64, value: u32) -> LlioResult<()> {
        let mut data = value;
        self.rw_32(offs, &mut data, true)
    }

    fn read_block(&mut self, offs: u64, buf: &mut [u8]) -> LlioResult<usize> {
        self.rw_block(offs, buf, false)
    }

    fn write_block(&mut self, offs: u64, buf: &[u8]) -> LlioResult<usize> {
        // `rw_block` takes `&mut [u8]` uniformly since reads fill it in
        // place; for writes we never mutate the caller's buffer.
        let mut scratch = buf.to_vec();
        self.rw_block(offs, &mut scratch, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::FakeBar;

    /// A [`BarMapper`] that hands back pre-built [`FakeBar`]s. Tests that
    /// need to inspect a fake's internal counters after the backend takes
    /// ownership of it go through `as_any().downcast_ref`.
    struct FixedMapper {
        bar0: Option<Box<dyn PcieBar>>,
        bar2: Option<Box<dyn PcieBar>>,
        bar4: Option<Box<dyn PcieBar>>,
    }

    impl BarMapper for FixedMapper {
        fn map(&mut self, _dev_entry: &str, bar_no: u8) -> LlioResult<Box<dyn PcieBar>> {
            let bar = match bar_no {
                BAR0NO => self.bar0.take(),
                BAR2NO => self.bar2.take(),
                BAR4NO => self.bar4.take(),
                _ => None,
            };
            bar.ok_or(LlioError::Backend("no fake bar configured".into()))
        }
    }

    fn open_backend(
        bar0_len: usize,
        bar2_len: usize,
        bar4_len: usize,
        sdram_pg: u32,
        wb_pg: u32,
    ) -> PcieBackend {
        let mapper = FixedMapper {
            bar0: Some(Box::new(FakeBar::new(bar0_len))),
            bar2: Some(Box::new(FakeBar::new(bar2_len))),
            bar4: Some(Box::new(FakeBar::new(bar4_len))),
        };
        let mut backend = PcieBackend::new(Box::new(mapper), sdram_pg, wb_pg);
        let ep = Endpoint::new(crate::endpoint::TransportKind::Pcie, "fake0");
        backend.open(&ep).unwrap();
        backend
    }

    #[test]
    fn register_round_trip_s1() {
        // S1: offs = 0x4000_0010 (BAR4, page 0, offset 0x10)
        let mut backend = open_backend(0x1000, 0x40000, 0x40000, 0x20000, 0x20000);
        let offs = addr::pack(BAR4NO, 0x10);
        backend.write_32(offs, 0xDEADBEEF).unwrap();
        assert_eq!(backend.read_32(offs).unwrap(), 0xDEADBEEF);
    }

    #[test]
    fn cross_page_block_s2() {
        // S2: BAR2 page size 0x20000; start = 0x1FFF8, size = 32.
        let chunks = PcieBackend::plan_chunks(0, 0x1FFF8, 32, 0x20000);
        assert_eq!(chunks, vec![(0, 0x1FFF8, 8), (1, 0, 24)]);
    }

    #[test]
    fn chunk_sizes_always_sum_to_total() {
        for (start_off, size, pg_size) in [(0u64, 5000usize, 4096u32), (100, 1, 128), (4095, 2, 4096)] {
            let chunks = PcieBackend::plan_chunks(0, start_off, size, pg_size);
            let total: usize = chunks.iter().map(|&(_, _, len)| len).sum();
            assert_eq!(total, size);
            for &(_, off, len) in &chunks {
                assert!(off + len as u64 <= pg_size as u64);
            }
        }
    }

    #[test]
    fn timeout_then_success_s3() {
        // BAR4 block read of 256 bytes: the fake returns 256 x 0xFF once,
        // then the literal ramp 00 01 02 .. FF.
        let ramp: Vec<u8> = (0u32..256).map(|i| i as u8).collect();
        let bar4 = FakeBar::with_contents(ramp.clone());
        bar4.set_timeout_reads(1);

        let mapper = FixedMapper {
            bar0: Some(Box::new(FakeBar::new(0x1000))),
            bar2: Some(Box::new(FakeBar::new(0x40000))),
            bar4: Some(Box::new(bar4)),
        };
        let mut backend = PcieBackend::new(Box::new(mapper), 0x20000, 0x20000);
        let ep = Endpoint::new(crate::endpoint::TransportKind::Pcie, "fake0");
        backend.open(&ep).unwrap();

        let mut buf = vec![0u8; 256];
        let offs = addr::pack(BAR4NO, 0);
        let n = backend.read_block(offs, &mut buf).unwrap();
        assert_eq!(n, 256);
        assert_eq!(buf, ramp);

        let bar0 = backend
            .bar0
            .as_deref()
            .unwrap()
            .as_any()
            .downcast_ref::<FakeBar>()
            .unwrap();
        assert_eq!(bar0.channel_resets(), 1);
    }

    #[test]
    fn unrecoverable_timeout_exhausts_retries() {
        let bar4 = FakeBar::new(256);
        bar4.set_timeout_reads(PCIE_TIMEOUT_MAX_TRIES);

        let mapper = FixedMapper {
            bar0: Some(Box::new(FakeBar::new(0x1000))),
            bar2: Some(Box::new(FakeBar::new(0x40000))),
            bar4: Some(Box::new(bar4)),
        };
        let mut backend = PcieBackend::new(Box::new(mapper), 0x20000, 0x20000);
        let ep = Endpoint::new(crate::endpoint::TransportKind::Pcie, "fake0");
        backend.open(&ep).unwrap();

        let mut buf = vec![0u8; 256];
        let offs = addr::pack(BAR4NO, 0);
        let err = backend.read_block(offs, &mut buf).unwrap_err();
        assert_eq!(
            err,
            LlioError::TimeoutUnrecoverable {
                tries: PCIE_TIMEOUT_MAX_TRIES
            }
        );
    }

    #[test]
    fn closed_llio_rejects_io() {
        let mapper = FixedMapper {
            bar0: Some(Box::new(FakeBar::new(0x1000))),
            bar2: Some(Box::new(FakeBar::new(0x1000))),
            bar4: Some(Box::new(FakeBar::new(0x1000))),
        };
        let mut backend = PcieBackend::new(Box::new(mapper), 0x1000, 0x1000);
        // Never opened: bar0/2/4 are None, every op fails closed.
        assert_eq!(backend.read_32(addr::pack(BAR4NO, 0)), Err(LlioError::ClosedEndpoint));
    }
}
