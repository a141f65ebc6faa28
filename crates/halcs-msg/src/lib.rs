//! Typed dispatch tables and wire framing shared by the broker, client and
//! every SMIO worker.

pub mod argkind;
pub mod classify;
pub mod codec;
pub mod dispatch;
pub mod envelope;
pub mod error;

pub use argkind::{disp_get_asize, ArgKind, ArgValue};
pub use classify::{classify, Protocol, ThsafeOp, ThsafeRequest};
pub use dispatch::{DispatchEntry, DispatchTable, RetvalOwner, MSG_OPCODE_MAX};
pub use envelope::{
    parse_worker_request, worker_ready_frames, worker_reply_frames, MDPC_HEADER, MDPW_HEADER,
    WORKER_READY, WORKER_REPLY, WORKER_REQUEST,
};
pub use error::{MsgError, MsgResult};
