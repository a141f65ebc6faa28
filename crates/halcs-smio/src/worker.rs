use std::cell::RefCell;
use std::rc::Rc;

use halcs_llio::Llio;
use halcs_msg::{dispatch::dispatch_request, DispatchTable, MSG_OPCODE_MAX};

use crate::error::{SmioError, SmioResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    Exporting,
    Defaults,
    Ready,
    Draining,
    Exit,
}

/// A long-lived process attached to the broker under a service name, owning
/// one [`Llio`] handle. Drives itself through `INIT -> EXPORTING ->
/// DEFAULTS -> READY -> DRAINING -> EXIT`; each phase is a separate method
/// so the binary entry point controls exactly when broker I/O happens.
pub struct SmioWorker {
    state: WorkerState,
    pub llio: Rc<RefCell<Llio>>,
    pub table: DispatchTable,
    service_name: String,
}

impl SmioWorker {
    /// `llio` is shared (not owned outright) so other dispatch entries, such
    /// as the acquisition triad, can read the same hardware handle without
    /// the worker opening a second handle to the same device.
    pub fn new(service_name: impl Into<String>, llio: Rc<RefCell<Llio>>, table: DispatchTable) -> Self {
        SmioWorker {
            state: WorkerState::Init,
            llio,
            table,
            service_name: service_name.into(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// INIT: open the worker's LLIO handle.
    pub fn init(&mut self) -> SmioResult<()> {
        self.expect_state(WorkerState::Init)?;
        self.llio.borrow_mut().open()?;
        self.state = WorkerState::Exporting;
        Ok(())
    }

    /// EXPORTING: register every entry in the dispatch table with the
    /// broker under this worker's service name. The broker round-trip
    /// itself is a callback so this crate stays transport-agnostic.
    pub fn exporting(
        &mut self,
        mut register_with_broker: impl FnMut(&str, u32) -> SmioResult<()>,
    ) -> SmioResult<()> {
        self.expect_state(WorkerState::Exporting)?;
        for opcode in 0..=MSG_OPCODE_MAX {
            if let Some(entry) = self.table.get(opcode) {
                register_with_broker(&entry.name, entry.opcode)?;
            }
        }
        self.state = WorkerState::Defaults;
        Ok(())
    }

    /// DEFAULTS: apply default register writes directly on the owned `Llio`
    /// handle, with no client/broker round-trip and no race window.
    /// `writes` is `(offs, value)` pairs.
    pub fn apply_defaults(&mut self, writes: &[(u64, u32)]) -> SmioResult<()> {
        self.expect_state(WorkerState::Defaults)?;
        for &(offs, value) in writes {
            self.llio.borrow_mut().write_32(offs, value)?;
        }
        self.state = WorkerState::Ready;
        Ok(())
    }

    /// Unused-by-default fallback mirroring the source's documented
    /// broker-routed defaults path; kept for parity, not wired into `run`.
    pub fn apply_defaults_via_broker(
        &mut self,
        writes: &[(u64, u32)],
        mut call: impl FnMut(u64, u32) -> SmioResult<()>,
    ) -> SmioResult<()> {
        self.expect_state(WorkerState::Defaults)?;
        for &(offs, value) in writes {
            call(offs, value)?;
        }
        self.state = WorkerState::Ready;
        Ok(())
    }

    /// READY: serve one request. `arg_frames` excludes frame 0 (the opcode).
    pub fn serve_one(&mut self, opcode: u32, arg_frames: &[Vec<u8>]) -> SmioResult<(u32, Option<Vec<u8>>)> {
        self.expect_state(WorkerState::Ready)?;
        Ok(dispatch_request(&mut self.table, opcode, arg_frames))
    }

    /// Stop accepting new requests; in-flight requests must already have
    /// been answered by the caller before this is invoked.
    pub fn begin_draining(&mut self) -> SmioResult<()> {
        self.expect_state(WorkerState::Ready)?;
        self.state = WorkerState::Draining;
        Ok(())
    }

    /// DRAINING -> EXIT: deregister (caller's responsibility, via the
    /// broker client) and release the LLIO handle.
    pub fn exit(&mut self) -> SmioResult<()> {
        self.expect_state(WorkerState::Draining)?;
        self.llio.borrow_mut().release()?;
        self.state = WorkerState::Exit;
        Ok(())
    }

    fn expect_state(&self, expected: WorkerState) -> SmioResult<()> {
        if self.state != expected {
            return Err(SmioError::Lifecycle("worker not in expected lifecycle state"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halcs_llio::{Endpoint, LlioBackend, LlioResult, TransportKind};
    use halcs_msg::{ArgKind, ArgValue, DispatchEntry, RetvalOwner};

    struct NullBackend;
    impl LlioBackend for NullBackend {
        fn open(&mut self, _endpoint: &Endpoint) -> LlioResult<()> {
            Ok(())
        }
        fn release(&mut self) -> LlioResult<()> {
            Ok(())
        }
        fn read_32(&mut self, _offs: u64) -> LlioResult<u32> {
            Ok(0)
        }
        fn write_32(&mut self, _offs: u64, _value: u32) -> LlioResult<()> {
            Ok(())
        }
        fn read_block(&mut self, _offs: u64, buf: &mut [u8]) -> LlioResult<usize> {
            Ok(buf.len())
        }
        fn write_block(&mut self, _offs: u64, buf: &[u8]) -> LlioResult<usize> {
            Ok(buf.len())
        }
    }

    fn make_worker() -> SmioWorker {
        let endpoint = Endpoint::new(TransportKind::Pcie, "fake0");
        let llio = Rc::new(RefCell::new(Llio::new(endpoint, Box::new(NullBackend))));
        let mut table = DispatchTable::new();
        table
            .register(DispatchEntry::new(
                "noop",
                7,
                vec![ArgKind::U32, ArgKind::U32],
                Some(ArgKind::U32),
                RetvalOwner::Caller,
                Box::new(|args: &[ArgValue]| {
                    Ok(Some(ArgValue::U32(
                        args[0].as_u32().unwrap() + args[1].as_u32().unwrap(),
                    )))
                }),
            ))
            .unwrap();
        SmioWorker::new("test-service", llio, table)
    }

    #[test]
    fn full_lifecycle() {
        let mut worker = make_worker();
        worker.init().unwrap();
        assert_eq!(worker.state(), WorkerState::Exporting);

        let mut registered = Vec::new();
        worker
            .exporting(|name, opcode| {
                registered.push((name.to_string(), opcode));
                Ok(())
            })
            .unwrap();
        assert_eq!(registered, vec![("noop".to_string(), 7)]);
        assert_eq!(worker.state(), WorkerState::Defaults);

        worker.apply_defaults(&[(0x10, 0xDEAD_BEEF)]).unwrap();
        assert_eq!(worker.state(), WorkerState::Ready);

        let (err, payload) = worker
            .serve_one(7, &[1u32.to_le_bytes().to_vec(), 2u32.to_le_bytes().to_vec()])
            .unwrap();
        assert_eq!(err, 0);
        assert_eq!(payload.unwrap(), 3u32.to_le_bytes().to_vec());

        worker.begin_draining().unwrap();
        worker.exit().unwrap();
        assert_eq!(worker.state(), WorkerState::Exit);
    }

    #[test]
    fn serve_one_rejected_outside_ready() {
        let mut worker = make_worker();
        let err = worker.serve_one(7, &[]).unwrap_err();
        assert!(matches!(err, SmioError::Lifecycle(_)));
    }

    #[test]
    fn unregistered_opcode_rejected_once_ready() {
        let mut worker = make_worker();
        worker.init().unwrap();
        worker.exporting(|_, _| Ok(())).unwrap();
        worker.apply_defaults(&[]).unwrap();
        let (err, _) = worker.serve_one(42, &[]).unwrap();
        assert_ne!(err, 0);
    }
}
