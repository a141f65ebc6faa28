use std::cell::RefCell;
use std::rc::Rc;

use halcs_msg::{ArgKind, ArgValue, DispatchEntry, DispatchTable, MsgError, MsgResult, RetvalOwner};

/// A set/get register pair: arg 0 selects read (0) or write (1), arg 1 is
/// the value on write and ignored on read; the current value is always
/// returned inline, matching `sm_io_dsp_exports.c`'s `DISP_OWNER_OTHER`
/// exported operations.
fn set_get_handler(reg: Rc<RefCell<u32>>) -> impl FnMut(&[ArgValue]) -> MsgResult<Option<ArgValue>> {
    move |args: &[ArgValue]| {
        let mode = args[0].as_u32().ok_or(MsgError::WrongArgs)?;
        let value = args[1].as_u32().ok_or(MsgError::WrongArgs)?;
        if mode != 0 {
            *reg.borrow_mut() = value;
        }
        Ok(Some(ArgValue::U32(*reg.borrow())))
    }
}

/// Opcodes for the built-in DSP set/get family, grounded in
/// `sm_io_dsp_codes.h`'s `DSP_OPCODE_*` constants.
pub const DSP_OPCODE_SET_GET_KX: u32 = 1;
pub const DSP_OPCODE_SET_GET_KY: u32 = 2;
pub const DSP_OPCODE_SET_GET_KSUM: u32 = 3;

/// The DSP registers backing the three set/get exports. Each starts at 0,
/// matching the DEFAULTS phase writing known-good values over them before
/// the worker goes READY.
#[derive(Clone, Default)]
pub struct DspRegisters {
    pub kx: Rc<RefCell<u32>>,
    pub ky: Rc<RefCell<u32>>,
    pub ksum: Rc<RefCell<u32>>,
}

impl DspRegisters {
    pub fn new() -> Self {
        DspRegisters::default()
    }

    /// Register the `set_get_kx` / `set_get_ky` / `set_get_ksum` triad onto
    /// `table`.
    pub fn register(&self, table: &mut DispatchTable) -> MsgResult<()> {
        let set_get_args = vec![ArgKind::U32, ArgKind::U32];

        table.register(DispatchEntry::new(
            "set_get_kx",
            DSP_OPCODE_SET_GET_KX,
            set_get_args.clone(),
            Some(ArgKind::U32),
            RetvalOwner::Caller,
            Box::new(set_get_handler(self.kx.clone())),
        ))?;
        table.register(DispatchEntry::new(
            "set_get_ky",
            DSP_OPCODE_SET_GET_KY,
            set_get_args.clone(),
            Some(ArgKind::U32),
            RetvalOwner::Caller,
            Box::new(set_get_handler(self.ky.clone())),
        ))?;
        table.register(DispatchEntry::new(
            "set_get_ksum",
            DSP_OPCODE_SET_GET_KSUM,
            set_get_args,
            Some(ArgKind::U32),
            RetvalOwner::Caller,
            Box::new(set_get_handler(self.ksum.clone())),
        ))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halcs_msg::dispatch::dispatch_request;

    #[test]
    fn set_then_get_kx() {
        let regs = DspRegisters::new();
        let mut table = DispatchTable::new();
        regs.register(&mut table).unwrap();

        let set_frames = vec![1u32.to_le_bytes().to_vec(), 42u32.to_le_bytes().to_vec()];
        let (err, payload) = dispatch_request(&mut table, DSP_OPCODE_SET_GET_KX, &set_frames);
        assert_eq!(err, 0);
        assert_eq!(payload.unwrap(), 42u32.to_le_bytes().to_vec());

        let get_frames = vec![0u32.to_le_bytes().to_vec(), 0u32.to_le_bytes().to_vec()];
        let (err, payload) = dispatch_request(&mut table, DSP_OPCODE_SET_GET_KX, &get_frames);
        assert_eq!(err, 0);
        assert_eq!(payload.unwrap(), 42u32.to_le_bytes().to_vec());
    }

    #[test]
    fn registers_are_independent() {
        let regs = DspRegisters::new();
        let mut table = DispatchTable::new();
        regs.register(&mut table).unwrap();

        dispatch_request(
            &mut table,
            DSP_OPCODE_SET_GET_KX,
            &[1u32.to_le_bytes().to_vec(), 10u32.to_le_bytes().to_vec()],
        );
        dispatch_request(
            &mut table,
            DSP_OPCODE_SET_GET_KY,
            &[1u32.to_le_bytes().to_vec(), 20u32.to_le_bytes().to_vec()],
        );

        let (_, kx) = dispatch_request(
            &mut table,
            DSP_OPCODE_SET_GET_KX,
            &[0u32.to_le_bytes().to_vec(), 0u32.to_le_bytes().to_vec()],
        );
        let (_, ky) = dispatch_request(
            &mut table,
            DSP_OPCODE_SET_GET_KY,
            &[0u32.to_le_bytes().to_vec(), 0u32.to_le_bytes().to_vec()],
        );
        assert_eq!(kx.unwrap(), 10u32.to_le_bytes().to_vec());
        assert_eq!(ky.unwrap(), 20u32.to_le_bytes().to_vec());
    }
}
