//! Thin Majordomo client: wire envelope, a typed-RPC `call`, and the
//! acquisition-polling `get_curve` helper used by acquisition-capable SMIOs'
//! own clients and by end-user applications alike.

pub mod acquire;
pub mod client;
pub mod envelope;
pub mod error;

pub use acquire::{get_curve, AcqStatus, AcquisitionClient, BLOCK_SIZE};
pub use client::{func_exec_u32, MajordomoClient};
pub use error::{ClientError, ClientResult};
