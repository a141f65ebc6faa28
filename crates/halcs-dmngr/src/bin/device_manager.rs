use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use halcs_dmngr::{discovery::scan_endpoints, DmngrConfig, ProcessSpawner, Supervisor, WaitpidReaper};

#[derive(Parser, Debug)]
#[command(name = "device-manager", about = "Discovers BPM endpoints, spawns SMIO workers and the broker, and supervises both")]
struct Cli {
    #[arg(long)]
    config: String,

    #[arg(long, default_value_t = false)]
    verbose: bool,
}

static mut REAP_REQUESTED: Option<Arc<AtomicBool>> = None;
static mut SHUTDOWN: Option<Arc<AtomicBool>> = None;

extern "C" fn handle_sigchld(_sig: libc::c_int) {
    // SAFETY: only an atomic store; installed once before any signal fires.
    unsafe {
        if let Some(flag) = &REAP_REQUESTED {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

extern "C" fn handle_term(_sig: libc::c_int) {
    // SAFETY: see above.
    unsafe {
        if let Some(flag) = &SHUTDOWN {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

fn install_signal_handlers() -> (Arc<AtomicBool>, Arc<AtomicBool>) {
    let reap = Arc::new(AtomicBool::new(false));
    let shutdown = Arc::new(AtomicBool::new(false));
    // SAFETY: each handler only performs an async-signal-safe atomic store.
    unsafe {
        REAP_REQUESTED = Some(reap.clone());
        SHUTDOWN = Some(shutdown.clone());
        libc::signal(libc::SIGCHLD, handle_sigchld as libc::sighandler_t);
        libc::signal(libc::SIGINT, handle_term as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_term as libc::sighandler_t);
    }
    (reap, shutdown)
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
    let config = DmngrConfig::from_toml_str(&raw_config).unwrap_or_else(|e| {
        log::error!("failed to parse config: {}", e);
        std::process::exit(1);
    });

    let (reap_requested, shutdown) = install_signal_handlers();

    let mut sup = Supervisor::new(config.respawn_killed_devio, ProcessSpawner);

    sup.ensure_broker("halcs-broker", &["--endpoint".to_string(), config.broker_endpoint.clone()])
        .expect("failed to spawn broker");

    let endpoints = scan_endpoints(Path::new(&config.endpoint_scan_dir), &config.endpoint_scan_pattern)
        .expect("endpoint discovery failed");
    log::info!("[dmngr] discovered {} endpoint(s)", endpoints.len());

    for endpoint in &endpoints {
        let service_name = format!("smio.{}", endpoint);
        let endpoint_path = format!("{}/{}", config.endpoint_scan_dir, endpoint);
        sup.spawn_devio(
            endpoint,
            &service_name,
            "smio-worker",
            &[
                "--config".to_string(),
                cli.config.clone(),
                "--broker-endpoint".to_string(),
                config.broker_endpoint.clone(),
            ],
        )
        .unwrap_or_else(|e| log::error!("failed to spawn worker for {}: {}", endpoint_path, e));
    }

    while !shutdown.load(Ordering::SeqCst) {
        sup.ensure_broker("halcs-broker", &["--endpoint".to_string(), config.broker_endpoint.clone()])
            .ok();

        if reap_requested.swap(false, Ordering::SeqCst) {
            let respawned = sup.reap(&mut WaitpidReaper);
            for endpoint in respawned {
                log::info!("[dmngr] respawned {}", endpoint);
            }
        }

        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("[dmngr] shutting down");
}
