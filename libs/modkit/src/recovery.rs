//! Bounded-retry recovery for modules that land in `ERROR`.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::ManagerError;
use crate::module::ModuleState;

/// Tracks per-module retry counts for [`Manager::recover_module`](crate::manager::Manager::recover_module)
/// and enforces `max_attempts`/`delay_ms`.
pub struct RecoverySupervisor {
    max_attempts: u32,
    delay: Duration,
    attempts: Mutex<HashMap<String, u32>>,
}

impl RecoverySupervisor {
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns `Err` if `module` is not currently in `ERROR` or has already
    /// exhausted its retry budget; otherwise increments the attempt counter
    /// and returns the attempt number just taken.
    pub fn begin_attempt(&self, module: &str, current_state: ModuleState) -> Result<u32, ManagerError> {
        if current_state != ModuleState::Error {
            return Err(ManagerError::RecoveryNotLegal {
                module: module.to_string(),
                state: current_state.to_string(),
            });
        }

        let mut attempts = self.attempts.lock();
        let count = attempts.entry(module.to_string()).or_insert(0);
        if *count >= self.max_attempts {
            return Err(ManagerError::RecoveryExhausted {
                module: module.to_string(),
                attempts: *count,
            });
        }
        *count += 1;
        Ok(*count)
    }

    /// Clears the retry counter after a module recovers successfully.
    pub fn on_success(&self, module: &str) {
        self.attempts.lock().remove(module);
    }

    #[must_use]
    pub fn attempt_count(&self, module: &str) -> u32 {
        self.attempts.lock().get(module).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_recovery_outside_error_state() {
        let sup = RecoverySupervisor::new(3, Duration::from_millis(0));
        let err = sup.begin_attempt("m", ModuleState::Running).unwrap_err();
        assert!(matches!(err, ManagerError::RecoveryNotLegal { .. }));
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let sup = RecoverySupervisor::new(2, Duration::from_millis(0));
        assert_eq!(sup.begin_attempt("m", ModuleState::Error).unwrap(), 1);
        assert_eq!(sup.begin_attempt("m", ModuleState::Error).unwrap(), 2);
        let err = sup.begin_attempt("m", ModuleState::Error).unwrap_err();
        assert!(matches!(err, ManagerError::RecoveryExhausted { attempts: 2, .. }));
    }

    #[test]
    fn success_resets_counter() {
        let sup = RecoverySupervisor::new(2, Duration::from_millis(0));
        sup.begin_attempt("m", ModuleState::Error).unwrap();
        sup.on_success("m");
        assert_eq!(sup.attempt_count("m"), 0);
        assert_eq!(sup.begin_attempt("m", ModuleState::Error).unwrap(), 1);
    }
}
