use crate::error::{DmngrError, DmngrResult};

/// Spawns a child process. Abstracted through a trait (rather than calling
/// `std::process::Command` directly from the supervisor) so tests can
/// substitute a fake, the same substitution point as the source's
/// `spawn_chld_handler_fp` function pointer.
pub trait SpawnHook {
    fn spawn(&mut self, program: &str, args: &[String]) -> DmngrResult<i32>;
}

/// Spawns real OS processes via `std::process::Command`, the safe
/// replacement for the source's `fork`+`execve` pair.
pub struct ProcessSpawner;

impl SpawnHook for ProcessSpawner {
    fn spawn(&mut self, program: &str, args: &[String]) -> DmngrResult<i32> {
        std::process::Command::new(program)
            .args(args)
            .spawn()
            .map(|child| child.id() as i32)
            .map_err(|e| DmngrError::Spawn(e.to_string()))
    }
}
