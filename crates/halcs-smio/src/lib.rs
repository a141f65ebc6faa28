//! SMIO worker lifecycle, acquisition sub-protocol, and the built-in DSP
//! set/get dispatch table used as a concrete, testable exported service.

pub mod acquisition;
pub mod config;
pub mod dsp;
pub mod error;
pub mod worker;

pub use acquisition::{
    AcqHardware, AcqOps, AcqStatus, AcquisitionEngine, ChannelTable, LlioAcqHardware, BLOCK_SIZE,
    ACQ_OPCODE_CHECK_DATA_ACQUIRE, ACQ_OPCODE_DATA_ACQUIRE, ACQ_OPCODE_GET_DATA_BLOCK,
};
pub use config::SmioConfig;
pub use error::{SmioError, SmioResult};
pub use worker::{SmioWorker, WorkerState};
