use crate::argkind::{disp_get_asize, ArgKind, ArgValue};
use crate::error::{MsgError, MsgResult};

/// Upper bound of the wire-addressable opcode space.
pub const MSG_OPCODE_MAX: u32 = 200;

/// Who owns the storage for a handler's return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetvalOwner {
    /// The handler writes into a caller-supplied buffer (no inline payload).
    Callee,
    /// The return value is transported inline in the reply.
    Caller,
}

/// A handler invoked once its arguments have been validated and decoded.
///
/// Not `Send`: the dispatch table lives inside a single SMIO worker process
/// and is driven by that process's single-threaded cooperative request loop
/// (see the concurrency model), so handlers are free to close over `Rc`s.
pub type Handler = Box<dyn FnMut(&[ArgValue]) -> MsgResult<Option<ArgValue>>>;

/// One exported operation: its wire shape plus the function that serves it.
pub struct DispatchEntry {
    pub name: String,
    pub opcode: u32,
    /// Argument kinds, *not* including the `ArgKind::End` terminator.
    pub arg_kinds: Vec<ArgKind>,
    pub retval_kind: Option<ArgKind>,
    pub retval_owner: RetvalOwner,
    pub handler: Handler,
}

impl DispatchEntry {
    pub fn new(
        name: impl Into<String>,
        opcode: u32,
        arg_kinds: Vec<ArgKind>,
        retval_kind: Option<ArgKind>,
        retval_owner: RetvalOwner,
        handler: Handler,
    ) -> Self {
        debug_assert!(
            !arg_kinds.contains(&ArgKind::End),
            "arg_kinds must not include the End marker explicitly"
        );
        DispatchEntry {
            name: name.into(),
            opcode,
            arg_kinds,
            retval_kind,
            retval_owner,
            handler,
        }
    }
}

/// An append-only `opcode -> descriptor` registry.
pub struct DispatchTable {
    entries: Vec<Option<DispatchEntry>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        DispatchTable {
            entries: (0..=MSG_OPCODE_MAX).map(|_| None).collect(),
        }
    }

    pub fn register(&mut self, entry: DispatchEntry) -> MsgResult<()> {
        if entry.opcode > MSG_OPCODE_MAX {
            return Err(MsgError::UnknownOpcode(entry.opcode));
        }
        let slot = &mut self.entries[entry.opcode as usize];
        if slot.is_some() {
            return Err(MsgError::ProtocolMalformed(format!(
                "opcode {} already registered",
                entry.opcode
            )));
        }
        *slot = Some(entry);
        Ok(())
    }

    pub fn get(&self, opcode: u32) -> Option<&DispatchEntry> {
        self.entries.get(opcode as usize).and_then(|e| e.as_ref())
    }

    pub fn get_mut(&mut self, opcode: u32) -> Option<&mut DispatchEntry> {
        self.entries.get_mut(opcode as usize).and_then(|e| e.as_mut())
    }

    /// Linear scan by name, used only on the client side to resolve a
    /// service's human-readable operation name to its wire opcode.
    pub fn find_by_name(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .flatten()
            .find(|e| e.name == name)
            .map(|e| e.opcode)
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate `arg_frames` against `entry`'s declared argument kinds (frame
/// count and each frame's fixed width) and decode them.
pub fn validate_and_decode(entry: &DispatchEntry, arg_frames: &[Vec<u8>]) -> MsgResult<Vec<ArgValue>> {
    if arg_frames.len() != entry.arg_kinds.len() {
        return Err(MsgError::WrongArgs);
    }

    let mut values = Vec::with_capacity(arg_frames.len());
    for (kind, frame) in entry.arg_kinds.iter().zip(arg_frames) {
        if let Some(expected) = disp_get_asize(*kind) {
            if frame.len() != expected {
                return Err(MsgError::WrongArgs);
            }
        }
        let value = ArgValue::decode(*kind, frame).ok_or(MsgError::WrongArgs)?;
        values.push(value);
    }
    Ok(values)
}

/// Run one dispatch table lookup + validation + handler invocation.
///
/// Returns `(err_code, payload)`: `err_code` is `0` on success, a
/// [`MsgError::code`] value otherwise; `payload` is the encoded return value
/// when the descriptor declares one and the handler succeeded.
pub fn dispatch_request(
    table: &mut DispatchTable,
    opcode: u32,
    arg_frames: &[Vec<u8>],
) -> (u32, Option<Vec<u8>>) {
    let entry = match table.get_mut(opcode) {
        Some(e) => e,
        None => return (MsgError::UnknownOpcode(opcode).code(), None),
    };

    let args = match validate_and_decode(entry, arg_frames) {
        Ok(a) => a,
        Err(e) => return (e.code(), None),
    };

    match (entry.handler)(&args) {
        Ok(Some(retval)) => (0, Some(retval.encode())),
        Ok(None) => (0, None),
        Err(e) => (e.code(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_entry() -> DispatchEntry {
        DispatchEntry::new(
            "noop",
            7,
            vec![ArgKind::U32, ArgKind::U32],
            Some(ArgKind::U32),
            RetvalOwner::Caller,
            Box::new(|args| {
                let a = args[0].as_u32().unwrap();
                let b = args[1].as_u32().unwrap();
                Ok(Some(ArgValue::U32(a + b)))
            }),
        )
    }

    #[test]
    fn dispatch_two_args_s4() {
        let mut table = DispatchTable::new();
        table.register(noop_entry()).unwrap();

        let frames = vec![1u32.to_le_bytes().to_vec(), 2u32.to_le_bytes().to_vec()];
        let (err, payload) = dispatch_request(&mut table, 7, &frames);
        assert_eq!(err, 0);
        assert_eq!(payload.unwrap(), 3u32.to_le_bytes().to_vec());
    }

    #[test]
    fn dispatch_wrong_arg_count_s4() {
        let mut table = DispatchTable::new();
        table.register(noop_entry()).unwrap();

        let frames = vec![1u32.to_le_bytes().to_vec()];
        let (err, payload) = dispatch_request(&mut table, 7, &frames);
        assert_eq!(err, MsgError::WrongArgs.code());
        assert!(payload.is_none());
    }

    #[test]
    fn dispatch_wrong_arg_size_rejected() {
        let mut table = DispatchTable::new();
        table.register(noop_entry()).unwrap();

        let frames = vec![vec![0u8; 8], 2u32.to_le_bytes().to_vec()];
        let (err, _) = dispatch_request(&mut table, 7, &frames);
        assert_eq!(err, MsgError::WrongArgs.code());
    }

    #[test]
    fn unknown_opcode_rejected() {
        let mut table = DispatchTable::new();
        let (err, _) = dispatch_request(&mut table, 199, &[]);
        assert_eq!(err, MsgError::UnknownOpcode(199).code());
    }

    #[test]
    fn duplicate_opcode_registration_rejected() {
        let mut table = DispatchTable::new();
        table.register(noop_entry()).unwrap();
        assert!(table.register(noop_entry()).is_err());
    }

    #[test]
    fn opcode_beyond_max_rejected() {
        let mut table = DispatchTable::new();
        let entry = DispatchEntry::new(
            "too-high",
            MSG_OPCODE_MAX + 1,
            vec![],
            None,
            RetvalOwner::Callee,
            Box::new(|_| Ok(None)),
        );
        assert!(table.register(entry).is_err());
    }
}
