use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use halcs_llio::addr::{self, BAR0NO, BAR2NO};
use halcs_llio::{bar::SysfsBarMapper, pcie::PcieBackend, Endpoint, Llio, TransportKind};
use halcs_msg::classify::ThsafeOp;
use halcs_msg::{
    classify, codec, parse_worker_request, worker_ready_frames, worker_reply_frames, DispatchTable,
    MsgError, Protocol,
};
use halcs_smio::{
    dsp::DspRegisters, AcqOps, AcquisitionEngine, ChannelTable, LlioAcqHardware, SmioConfig,
    SmioWorker,
};

#[derive(Parser, Debug)]
#[command(name = "smio-worker", about = "Hardware-backed service endpoint for one BPM FPGA instrument")]
struct Cli {
    /// Path to a TOML configuration file (see halcs_smio::SmioConfig).
    #[arg(long)]
    config: String,

    /// Override the broker endpoint from the config file.
    #[arg(long)]
    broker_endpoint: Option<String>,

    #[arg(long, default_value_t = false)]
    verbose: bool,
}

fn install_interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    // SAFETY: `handler` only performs an async-signal-safe atomic store.
    unsafe {
        INTERRUPTED = Some(flag.clone());
        libc::signal(libc::SIGINT, handle_interrupt as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_interrupt as libc::sighandler_t);
    }
    flag
}

static mut INTERRUPTED: Option<Arc<AtomicBool>> = None;

extern "C" fn handle_interrupt(_sig: libc::c_int) {
    // SAFETY: only ever touched from this handler and from
    // `install_interrupt_flag`, which runs once before any signal can fire.
    unsafe {
        if let Some(flag) = &INTERRUPTED {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let raw_config = std::fs::read_to_string(&cli.config).unwrap_or_else(|e| {
        log::error!("failed to read config {}: {}", cli.config, e);
        std::process::exit(1);
    });
    let mut config = SmioConfig::from_toml_str(&raw_config).unwrap_or_else(|e| {
        log::error!("failed to parse config: {}", e);
        std::process::exit(1);
    });
    if let Some(ep) = cli.broker_endpoint {
        config.broker_endpoint = ep;
    }

    let interrupted = install_interrupt_flag();

    let endpoint = Endpoint::new(TransportKind::Pcie, config.endpoint_name.clone());
    let backend = PcieBackend::new(Box::new(SysfsBarMapper::new()), 0x20000, 0x20000);
    let llio = Rc::new(RefCell::new(Llio::new(endpoint, Box::new(backend))));

    let mut table = DispatchTable::new();
    let dsp = DspRegisters::new();
    dsp.register(&mut table).expect("built-in DSP opcodes should not collide");

    // Channel 0, one representative device-family example: 16-byte samples,
    // status/done bit and SDRAM base are device-specific and left as
    // placeholders pointing at BAR0 (control/status) and BAR2 (SDRAM).
    let channels = ChannelTable::new().with_channel(0, 16);
    let acq_hw = LlioAcqHardware::new(llio.clone(), addr::pack(BAR0NO, 0x100), 0x1, addr::pack(BAR2NO, 0));
    let acq = AcqOps::new(AcquisitionEngine::new(channels, Box::new(acq_hw)));
    acq.register(&mut table).expect("built-in acquisition opcodes should not collide");

    let mut worker = SmioWorker::new(config.service_name.clone(), llio, table);

    worker.init().expect("failed to open LLIO endpoint");
    worker
        .exporting(|name, opcode| {
            log::info!("[smio] exporting {} as opcode {}", name, opcode);
            Ok(())
        })
        .expect("exporting should never fail for a freshly built table");
    worker
        .apply_defaults(&[])
        .expect("applying defaults should not touch hardware at this stage");

    log::info!(
        "[smio] {} ready, connecting to broker at {}",
        worker.service_name(),
        config.broker_endpoint
    );

    let ctx = zmq::Context::new();
    let socket = ctx.socket(zmq::DEALER).expect("failed to create worker socket");
    socket
        .connect(&config.broker_endpoint)
        .expect("failed to connect to broker");
    socket
        .send_multipart(&worker_ready_frames(worker.service_name()), 0)
        .expect("failed to announce readiness to broker");

    while !interrupted.load(Ordering::SeqCst) {
        let mut items = [socket.as_poll_item(zmq::POLLIN)];
        let n = zmq::poll(&mut items, 200).unwrap_or(0);
        if n == 0 {
            continue;
        }

        let frames = match socket.recv_multipart(0) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("[smio] recv failed: {}", e);
                continue;
            }
        };

        let (client_identity, body) = match parse_worker_request(&frames) {
            Some(v) => v,
            None => {
                log::warn!("[smio] malformed broker frame, dropping");
                continue;
            }
        };

        let reply_body = serve_request(&mut worker, body);
        let reply = worker_reply_frames(&client_identity, &reply_body);
        if let Err(e) = socket.send_multipart(&reply, 0) {
            log::warn!("[smio] send failed: {}", e);
        }
    }

    worker.begin_draining().expect("drain from a ready worker");
    worker.exit().expect("release LLIO on exit");
    log::info!("[smio] {} exiting", worker.service_name());
}

/// Classify one raw inbound message and dispatch it, returning the reply
/// frames (still wrapped in whatever envelope the caller used, since this
/// layer only sees the body).
fn serve_request(worker: &mut SmioWorker, frames: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let (frame0, rest) = match codec::split_frame0(frames) {
        Ok(v) => v,
        Err(e) => return codec::encode_reply(e.code(), None),
    };

    match classify(frame0) {
        Ok(Protocol::ExpZmq(opcode)) => {
            let (err, payload) = worker
                .serve_one(opcode, rest)
                .unwrap_or_else(|e| (halcs_msg::MsgError::Handler(e.to_string()).code(), None));
            codec::encode_reply(err, payload.as_deref())
        }
        Ok(Protocol::ThsafeZmq(op)) => {
            // Raw register access bypasses the dispatch table and runs
            // directly against `worker.llio`.
            let (err, payload) = serve_thsafe(worker, op, rest);
            codec::encode_reply(err, payload.as_deref())
        }
        Err(e) => codec::encode_reply(e.code(), None),
    }
}

/// Execute one raw register operation directly against the worker's LLIO
/// handle. Returns `(err_code, payload)` for the reply.
fn serve_thsafe(worker: &mut SmioWorker, op: ThsafeOp, rest: &[Vec<u8>]) -> (u32, Option<Vec<u8>>) {
    let parse_u64 = |f: &[u8]| u64::from_le_bytes(f.try_into().unwrap_or([0; 8]));

    let offs = match rest.first() {
        Some(f) if f.len() == 8 => parse_u64(f),
        _ => return (MsgError::WrongArgs.code(), None),
    };

    let mut llio = worker.llio.borrow_mut();
    let result = match op {
        ThsafeOp::Open => llio.open().map(|_| None),
        ThsafeOp::Release => llio.release().map(|_| None),
        ThsafeOp::Read32 => llio.read_32(offs).map(|v| Some(v.to_le_bytes().to_vec())),
        ThsafeOp::Write32 => match rest.get(1) {
            Some(p) if p.len() == 4 => llio
                .write_32(offs, u32::from_le_bytes(p.as_slice().try_into().unwrap()))
                .map(|_| None),
            _ => return (MsgError::WrongArgs.code(), None),
        },
        ThsafeOp::Read64 => llio.read_64(offs).map(|v| Some(v.to_le_bytes().to_vec())),
        ThsafeOp::Write64 => match rest.get(1) {
            Some(p) if p.len() == 8 => llio
                .write_64(offs, u64::from_le_bytes(p.as_slice().try_into().unwrap()))
                .map(|_| None),
            _ => return (MsgError::WrongArgs.code(), None),
        },
        ThsafeOp::ReadBlock => {
            let size = match rest.get(1) {
                Some(f) if f.len() == 4 => u32::from_le_bytes(f.as_slice().try_into().unwrap()) as usize,
                _ => return (MsgError::WrongArgs.code(), None),
            };
            let mut buf = vec![0u8; size];
            llio.read_block(offs, &mut buf).map(|_| Some(buf))
        }
        ThsafeOp::WriteBlock => match rest.get(2) {
            Some(p) => llio.write_block(offs, p).map(|_| None),
            None => return (MsgError::WrongArgs.code(), None),
        },
        ThsafeOp::Read16 | ThsafeOp::Write16 => return (MsgError::NotSupported.code(), None),
    };

    match result {
        Ok(payload) => (0, payload),
        Err(e) => (MsgError::Handler(e.to_string()).code(), None),
    }
}
