//! Minimal Majordomo-style broker. Routes typed-RPC requests from clients
//! (`MDPC01` envelope) to the idle worker registered for the requested
//! service (`MDPW01` envelope), and routes replies back.
//!
//! Simplified relative to full MDP/0.2: no heartbeating, no worker
//! DISCONNECT command, one in-flight request per worker. Sufficient to make
//! the workspace runnable end-to-end; a production deployment fronting many
//! clients would want the full protocol.

use std::collections::{HashMap, VecDeque};

use clap::Parser;

use halcs_msg::{MDPC_HEADER, MDPW_HEADER, WORKER_READY, WORKER_REPLY, WORKER_REQUEST};

#[derive(Parser, Debug)]
#[command(name = "halcs-broker", about = "Majordomo-style broker for the BPM service mesh")]
struct Cli {
    #[arg(long, default_value = "tcp://*:7777")]
    endpoint: String,

    #[arg(long, default_value_t = false)]
    verbose: bool,
}

/// A pending client request waiting for an idle worker.
struct PendingRequest {
    client_identity: Vec<u8>,
    body: Vec<Vec<u8>>,
}

#[derive(Default)]
struct Broker {
    /// service name -> idle worker identities
    idle_workers: HashMap<String, VecDeque<Vec<u8>>>,
    /// worker identity -> service name
    worker_service: HashMap<Vec<u8>, String>,
    /// service name -> queued requests awaiting a worker
    backlog: HashMap<String, VecDeque<PendingRequest>>,
}

impl Broker {
    fn handle_client_request(&mut self, client_identity: Vec<u8>, service: String, body: Vec<Vec<u8>>, socket: &zmq::Socket) {
        if let Some(worker) = self.idle_workers.get_mut(&service).and_then(|q| q.pop_front()) {
            self.dispatch_to_worker(&worker, &client_identity, &body, socket);
        } else {
            self.backlog
                .entry(service)
                .or_default()
                .push_back(PendingRequest { client_identity, body });
        }
    }

    fn dispatch_to_worker(&self, worker_identity: &[u8], client_identity: &[u8], body: &[Vec<u8>], socket: &zmq::Socket) {
        let mut frames = vec![
            worker_identity.to_vec(),
            Vec::new(),
            MDPW_HEADER.to_vec(),
            vec![WORKER_REQUEST],
            client_identity.to_vec(),
            Vec::new(),
        ];
        frames.extend(body.iter().cloned());
        if let Err(e) = socket.send_multipart(&frames, 0) {
            log::warn!("[broker] failed to dispatch to worker: {}", e);
        }
    }

    fn handle_worker_ready(&mut self, worker_identity: Vec<u8>, service: String) {
        log::info!("[broker] worker ready for service {}", service);
        self.worker_service.insert(worker_identity.clone(), service.clone());
        self.idle_workers.entry(service).or_default().push_back(worker_identity);
    }

    fn handle_worker_reply(&mut self, worker_identity: Vec<u8>, client_identity: Vec<u8>, body: Vec<Vec<u8>>, socket: &zmq::Socket) {
        let mut reply = vec![client_identity, Vec::new(), MDPC_HEADER.to_vec()];
        reply.extend(body);
        if let Err(e) = socket.send_multipart(&reply, 0) {
            log::warn!("[broker] failed to reply to client: {}", e);
        }

        let service = match self.worker_service.get(&worker_identity) {
            Some(s) => s.clone(),
            None => return,
        };

        if let Some(next) = self.backlog.get_mut(&service).and_then(|q| q.pop_front()) {
            self.dispatch_to_worker(&worker_identity, &next.client_identity, &next.body, socket);
        } else {
            self.idle_workers.entry(service).or_default().push_back(worker_identity);
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

    let ctx = zmq::Context::new();
    let socket = ctx.socket(zmq::ROUTER).expect("failed to create ROUTER socket");
    socket.bind(&cli.endpoint).expect("failed to bind broker endpoint");
    log::info!("[broker] listening on {}", cli.endpoint);

    let mut broker = Broker::default();

    loop {
        let frames = match socket.recv_multipart(0) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("[broker] recv failed: {}", e);
                continue;
            }
        };

        // frames[0] = sender identity (added by ROUTER), frames[1] = empty,
        // frames[2] = protocol header.
        if frames.len() < 3 || !frames[1].is_empty() {
            log::warn!("[broker] malformed frame, dropping");
            continue;
        }

        let sender = frames[0].clone();

        if frames[2] == MDPC_HEADER {
            if frames.len() < 4 {
                continue;
            }
            let service = String::from_utf8_lossy(&frames[3]).to_string();
            let body = frames[4..].to_vec();
            broker.handle_client_request(sender, service, body, &socket);
        } else if frames[2] == MDPW_HEADER {
            if frames.len() < 4 {
                continue;
            }
            match frames[3].first() {
                Some(&WORKER_READY) if frames.len() >= 5 => {
                    let service = String::from_utf8_lossy(&frames[4]).to_string();
                    broker.handle_worker_ready(sender, service);
                }
                Some(&WORKER_REPLY) if frames.len() >= 6 => {
                    let client_identity = frames[4].clone();
                    let body = frames[6..].to_vec();
                    broker.handle_worker_reply(sender, client_identity, body, &socket);
                }
                _ => log::warn!("[broker] unrecognized worker command"),
            }
        } else {
            log::warn!("[broker] unrecognized protocol header");
        }
    }
}
