use crate::registry::{ChildEntry, Registry};
use crate::spawn::SpawnHook;

/// Yields one exited child PID per call, or `None` once the queue is
/// drained. Abstracted so the supervisor's reap-and-respawn *decision*
/// logic can be tested without forking real processes; production code
/// drains `waitpid(-1, WNOHANG)` in a loop.
pub trait ReapSource {
    fn next_exited(&mut self) -> Option<i32>;
}

/// Real reaper: repeated non-blocking `waitpid` calls.
pub struct WaitpidReaper;

impl ReapSource for WaitpidReaper {
    fn next_exited(&mut self) -> Option<i32> {
        // SAFETY: a plain libc syscall wrapper; `status` is only read back
        // by us, never interpreted as a pointer.
        unsafe {
            let mut status: libc::c_int = 0;
            let pid = libc::waitpid(-1, &mut status, libc::WNOHANG);
            if pid > 0 {
                Some(pid)
            } else {
                None
            }
        }
    }
}

/// Supervises the broker and one SMIO child per hardware endpoint: spawns
/// the broker first, reaps dead children, and respawns those marked
/// desired-alive.
pub struct Supervisor<S: SpawnHook> {
    registry: Registry,
    respawn_killed_devio: bool,
    spawn_hook: S,
    broker_running: bool,
    broker_pid: Option<i32>,
    broker_spawn: Option<(String, Vec<String>)>,
}

impl<S: SpawnHook> Supervisor<S> {
    pub fn new(respawn_killed_devio: bool, spawn_hook: S) -> Self {
        Supervisor {
            registry: Registry::new(),
            respawn_killed_devio,
            spawn_hook,
            broker_running: false,
            broker_pid: None,
            broker_spawn: None,
        }
    }

    pub fn broker_running(&self) -> bool {
        self.broker_running
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Spawn the broker if it is not already running. The main loop calls
    /// this first, every iteration; it is a no-op once the bit is set.
    pub fn ensure_broker(&mut self, program: &str, args: &[String]) -> Result<(), crate::error::DmngrError> {
        if self.broker_running {
            return Ok(());
        }
        let pid = self.spawn_hook.spawn(program, args)?;
        self.broker_pid = Some(pid);
        self.broker_running = true;
        self.broker_spawn = Some((program.to_string(), args.to_vec()));
        log::info!("[dmngr] broker spawned, pid {}", pid);
        Ok(())
    }

    /// Spawn one SMIO child for `endpoint` and register it as desired-alive.
    pub fn spawn_devio(
        &mut self,
        endpoint: &str,
        service_name: &str,
        program: &str,
        args: &[String],
    ) -> Result<(), crate::error::DmngrError> {
        let pid = self.spawn_hook.spawn(program, args)?;
        let mut spawn_args = Vec::with_capacity(1 + args.len());
        spawn_args.push(program.to_string());
        spawn_args.extend_from_slice(args);
        self.registry.insert(
            endpoint,
            ChildEntry {
                pid,
                service_name: service_name.to_string(),
                spawn_args,
                desired_alive: true,
            },
        );
        log::info!("[dmngr] spawned {} for {}, pid {}", service_name, endpoint, pid);
        Ok(())
    }

    /// Drain `reaper`, respawning any exited desired-alive child (or the
    /// broker) when `respawn_killed_devio` is set. Returns the endpoints
    /// that were respawned (the broker is reported as endpoint `"broker"`).
    pub fn reap(&mut self, reaper: &mut impl ReapSource) -> Vec<String> {
        let mut respawned = Vec::new();

        while let Some(pid) = reaper.next_exited() {
            if self.broker_pid == Some(pid) {
                self.broker_running = false;
                log::warn!("[dmngr] broker (pid {}) exited", pid);
                if self.respawn_killed_devio {
                    if let Some((program, args)) = self.broker_spawn.clone() {
                        if self.ensure_broker(&program, &args).is_ok() {
                            respawned.push("broker".to_string());
                        }
                    }
                }
                continue;
            }

            let endpoint = match self.registry.find_by_pid(pid) {
                Some(e) => e.to_string(),
                None => continue,
            };

            log::warn!("[dmngr] child for {} (pid {}) exited", endpoint, pid);
            if !self.registry.desired_alive(&endpoint) || !self.respawn_killed_devio {
                continue;
            }

            let entry = self.registry.get(&endpoint).unwrap().clone();
            if let Ok(new_pid) = self.spawn_hook.spawn(&entry.spawn_args[0], &entry.spawn_args[1..]) {
                let _ = self.registry.set_pid(&endpoint, new_pid);
                log::info!("[dmngr] respawned {} as pid {}", endpoint, new_pid);
                respawned.push(endpoint);
            }
        }

        respawned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct FakeSpawner {
        next_pid: i32,
        spawned: Rc<RefCell<Vec<(String, Vec<String>)>>>,
    }

    impl SpawnHook for FakeSpawner {
        fn spawn(&mut self, program: &str, args: &[String]) -> Result<i32, crate::error::DmngrError> {
            self.next_pid += 1;
            self.spawned
                .borrow_mut()
                .push((program.to_string(), args.to_vec()));
            Ok(self.next_pid)
        }
    }

    struct FakeReaper(Vec<i32>);
    impl ReapSource for FakeReaper {
        fn next_exited(&mut self) -> Option<i32> {
            self.0.pop()
        }
    }

    #[test]
    fn respawns_desired_alive_child_s6() {
        let spawned = Rc::new(RefCell::new(Vec::new()));
        let spawner = FakeSpawner {
            next_pid: 100,
            spawned: spawned.clone(),
        };
        let mut sup = Supervisor::new(true, spawner);

        sup.spawn_devio("fpga0", "smio.fpga0", "smio-worker", &["--config".into(), "a.toml".into()])
            .unwrap();
        let old_pid = sup.registry().get("fpga0").unwrap().pid;

        let respawned = sup.reap(&mut FakeReaper(vec![old_pid]));
        assert_eq!(respawned, vec!["fpga0".to_string()]);

        let new_pid = sup.registry().get("fpga0").unwrap().pid;
        assert_ne!(old_pid, new_pid);
        assert_eq!(spawned.borrow().len(), 2);
    }

    #[test]
    fn does_not_respawn_desired_dead_child() {
        let spawner = FakeSpawner {
            next_pid: 100,
            spawned: Rc::new(RefCell::new(Vec::new())),
        };
        let mut sup = Supervisor::new(true, spawner);
        sup.spawn_devio("fpga0", "smio.fpga0", "smio-worker", &[]).unwrap();

        // Mark it not desired-alive by reinserting directly.
        sup.registry.insert(
            "fpga0",
            ChildEntry {
                pid: sup.registry().get("fpga0").unwrap().pid,
                service_name: "smio.fpga0".into(),
                spawn_args: vec![],
                desired_alive: false,
            },
        );

        let pid = sup.registry().get("fpga0").unwrap().pid;
        let respawned = sup.reap(&mut FakeReaper(vec![pid]));
        assert!(respawned.is_empty());
    }

    #[test]
    fn broker_respawned_first_on_death() {
        let spawner = FakeSpawner {
            next_pid: 1,
            spawned: Rc::new(RefCell::new(Vec::new())),
        };
        let mut sup = Supervisor::new(true, spawner);
        sup.ensure_broker("halcs-broker", &[]).unwrap();
        let broker_pid = sup.broker_pid.unwrap();
        assert!(sup.broker_running());

        let respawned = sup.reap(&mut FakeReaper(vec![broker_pid]));
        assert_eq!(respawned, vec!["broker".to_string()]);
        assert!(sup.broker_running());
        assert_ne!(sup.broker_pid.unwrap(), broker_pid);
    }
}
