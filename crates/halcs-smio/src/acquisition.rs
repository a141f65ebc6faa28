use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{SmioError, SmioResult};
use halcs_llio::{Llio, LlioError};
use halcs_msg::{ArgKind, ArgValue, DispatchEntry, DispatchTable, MsgError, MsgResult, RetvalOwner};

/// Maximum payload size of a single `get_data_block` reply.
pub const BLOCK_SIZE: usize = 4096;

/// A fixed, board-specific table of `channel_id -> sample_size` (bytes).
/// Read-only after construction.
#[derive(Debug, Clone, Default)]
pub struct ChannelTable(HashMap<u32, u32>);

impl ChannelTable {
    pub fn new() -> Self {
        ChannelTable(HashMap::new())
    }

    pub fn with_channel(mut self, channel_id: u32, sample_size: u32) -> Self {
        self.0.insert(channel_id, sample_size);
        self
    }

    pub fn sample_size(&self, channel_id: u32) -> Option<u32> {
        self.0.get(&channel_id).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqStatus {
    Ok,
    Busy,
    Again,
}

impl AcqStatus {
    fn wire_code(self) -> u32 {
        match self {
            AcqStatus::Ok => 0,
            AcqStatus::Busy => 1,
            AcqStatus::Again => 2,
        }
    }
}

/// Hardware hook an [`AcquisitionEngine`] drives: polling the FPGA's
/// acquisition-complete bit and pulling the acquired curve out of SDRAM.
/// Production code implements this over a worker's `Llio` handle via
/// [`LlioAcqHardware`]; tests substitute a fake. Not `Send`: it runs inside
/// the same single-threaded cooperative worker loop as the dispatch
/// [`Handler`](halcs_msg::dispatch::Handler) type, so it may close over an
/// `Rc` the same way.
pub trait AcqHardware {
    fn poll_complete(&mut self, channel_id: u32) -> bool;
    fn read_curve(&mut self, channel_id: u32, len: usize) -> Vec<u8>;
}

/// Drives [`AcqHardware`] over a real [`Llio`] handle: a 32-bit
/// acquisition-done status register and a block read out of the paged SDRAM
/// window. The exact status register offset/bit and SDRAM base vary per
/// device family, out of scope here (see SPEC_FULL.md's per-device chip
/// driver Non-goal); they are supplied by the caller at construction.
pub struct LlioAcqHardware {
    llio: Rc<RefCell<Llio>>,
    status_offs: u64,
    status_done_bit: u32,
    sdram_base_offs: u64,
}

impl LlioAcqHardware {
    pub fn new(llio: Rc<RefCell<Llio>>, status_offs: u64, status_done_bit: u32, sdram_base_offs: u64) -> Self {
        LlioAcqHardware {
            llio,
            status_offs,
            status_done_bit,
            sdram_base_offs,
        }
    }
}

impl AcqHardware for LlioAcqHardware {
    fn poll_complete(&mut self, _channel_id: u32) -> bool {
        self.llio
            .borrow_mut()
            .read_32(self.status_offs)
            .map(|v| v & self.status_done_bit != 0)
            .unwrap_or(false)
    }

    fn read_curve(&mut self, _channel_id: u32, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        if let Err(e) = self.llio.borrow_mut().read_block(self.sdram_base_offs, &mut buf) {
            log::warn!("[acq] SDRAM curve read failed: {}", e);
        }
        buf
    }
}

struct ActiveAcquisition {
    channel_id: u32,
    num_samples: u32,
    sample_size: u32,
    block_n_valid: u32,
    data: Option<Vec<u8>>,
}

/// The index one past the last full block, per the source's `bpm_get_curve`
/// loop bound: `total_bytes / BLOCK_SIZE`. Valid `get_data_block` indices run
/// `0..=block_n_valid` inclusive; the boundary index itself carries zero
/// valid bytes when the curve divides evenly.
pub fn block_n_valid(num_samples: u32, sample_size: u32) -> u32 {
    (num_samples as u64 * sample_size as u64 / BLOCK_SIZE as u64) as u32
}

/// Drives the `data_acquire` / `check_data_acquire` / `get_data_block` triad
/// for one acquisition-capable SMIO.
pub struct AcquisitionEngine {
    channels: ChannelTable,
    hw: Box<dyn AcqHardware>,
    active: Option<ActiveAcquisition>,
}

impl AcquisitionEngine {
    pub fn new(channels: ChannelTable, hw: Box<dyn AcqHardware>) -> Self {
        AcquisitionEngine {
            channels,
            hw,
            active: None,
        }
    }

    pub fn data_acquire(&mut self, channel_id: u32, num_samples: u32) -> SmioResult<AcqStatus> {
        if self.active.is_some() {
            return Ok(AcqStatus::Busy);
        }
        let sample_size = self
            .channels
            .sample_size(channel_id)
            .ok_or_else(|| SmioError::Llio(LlioError::BadArgument(format!("unknown channel {}", channel_id))))?;

        self.active = Some(ActiveAcquisition {
            channel_id,
            num_samples,
            sample_size,
            block_n_valid: block_n_valid(num_samples, sample_size),
            data: None,
        });
        Ok(AcqStatus::Ok)
    }

    pub fn check_data_acquire(&mut self) -> SmioResult<AcqStatus> {
        let active = self
            .active
            .as_mut()
            .ok_or(SmioError::Lifecycle("no acquisition in progress"))?;

        if active.data.is_some() {
            return Ok(AcqStatus::Ok);
        }

        if !self.hw.poll_complete(active.channel_id) {
            return Ok(AcqStatus::Again);
        }

        let total_bytes = active.num_samples as usize * active.sample_size as usize;
        active.data = Some(self.hw.read_curve(active.channel_id, total_bytes));
        Ok(AcqStatus::Ok)
    }

    /// Returns `(valid_bytes, block)`: `block` is always `BLOCK_SIZE` bytes
    /// (zero-padded past `valid_bytes`); only the first `valid_bytes` are
    /// meaningful.
    pub fn get_data_block(&self, block_idx: u32) -> SmioResult<(u32, Vec<u8>)> {
        let active = self
            .active
            .as_ref()
            .ok_or(SmioError::Lifecycle("no acquisition in progress"))?;
        let data = active
            .data
            .as_ref()
            .ok_or(SmioError::Lifecycle("acquisition not yet complete"))?;

        if block_idx > active.block_n_valid {
            return Err(SmioError::Llio(LlioError::BadArgument(format!(
                "block index {} beyond curve end (max {})",
                block_idx, active.block_n_valid
            ))));
        }

        let start = block_idx as usize * BLOCK_SIZE;
        let valid = data.len().saturating_sub(start).min(BLOCK_SIZE);

        let mut block = vec![0u8; BLOCK_SIZE];
        block[..valid].copy_from_slice(&data[start..start + valid]);
        Ok((valid as u32, block))
    }

    /// Clears completed/in-flight acquisition state, e.g. on worker drain.
    pub fn reset(&mut self) {
        self.active = None;
    }
}

/// Opcodes for the acquisition sub-protocol triad, grounded in
/// `libclient/bpm_client.c`'s `bpm_data_acquire` / `bpm_check_data_acquire` /
/// `bpm_get_data_block` family.
pub const ACQ_OPCODE_DATA_ACQUIRE: u32 = 10;
pub const ACQ_OPCODE_CHECK_DATA_ACQUIRE: u32 = 11;
pub const ACQ_OPCODE_GET_DATA_BLOCK: u32 = 12;

/// Wires an [`AcquisitionEngine`] onto a worker's dispatch table. The engine
/// is shared (not moved) across the three handler closures, the same
/// `Rc<RefCell<_>>` pattern `DspRegisters` uses for its set/get pairs.
pub struct AcqOps {
    engine: Rc<RefCell<AcquisitionEngine>>,
}

impl AcqOps {
    pub fn new(engine: AcquisitionEngine) -> Self {
        AcqOps {
            engine: Rc::new(RefCell::new(engine)),
        }
    }

    /// Register `data_acquire` / `check_data_acquire` / `get_data_block` onto
    /// `table`. `get_data_block`'s reply payload is `valid_bytes: u32` (LE)
    /// followed by the `BLOCK_SIZE`-byte block.
    pub fn register(&self, table: &mut DispatchTable) -> MsgResult<()> {
        let acquire_engine = self.engine.clone();
        table.register(DispatchEntry::new(
            "data_acquire",
            ACQ_OPCODE_DATA_ACQUIRE,
            vec![ArgKind::U32, ArgKind::U32],
            Some(ArgKind::U32),
            RetvalOwner::Caller,
            Box::new(move |args: &[ArgValue]| {
                let channel_id = args[0].as_u32().ok_or(MsgError::WrongArgs)?;
                let num_samples = args[1].as_u32().ok_or(MsgError::WrongArgs)?;
                let status = acquire_engine
                    .borrow_mut()
                    .data_acquire(channel_id, num_samples)
                    .map_err(|e| MsgError::Handler(e.to_string()))?;
                Ok(Some(ArgValue::U32(status.wire_code())))
            }),
        ))?;

        let check_engine = self.engine.clone();
        table.register(DispatchEntry::new(
            "check_data_acquire",
            ACQ_OPCODE_CHECK_DATA_ACQUIRE,
            vec![],
            Some(ArgKind::U32),
            RetvalOwner::Caller,
            Box::new(move |_args: &[ArgValue]| {
                let status = check_engine
                    .borrow_mut()
                    .check_data_acquire()
                    .map_err(|e| MsgError::Handler(e.to_string()))?;
                Ok(Some(ArgValue::U32(status.wire_code())))
            }),
        ))?;

        let block_engine = self.engine.clone();
        table.register(DispatchEntry::new(
            "get_data_block",
            ACQ_OPCODE_GET_DATA_BLOCK,
            vec![ArgKind::U32],
            Some(ArgKind::RawBlob),
            RetvalOwner::Caller,
            Box::new(move |args: &[ArgValue]| {
                let block_idx = args[0].as_u32().ok_or(MsgError::WrongArgs)?;
                let (valid, block) = block_engine
                    .borrow()
                    .get_data_block(block_idx)
                    .map_err(|e| MsgError::Handler(e.to_string()))?;
                let mut payload = valid.to_le_bytes().to_vec();
                payload.extend(block);
                Ok(Some(ArgValue::RawBlob(payload)))
            }),
        ))?;

        Ok(())
    }
}
