use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a running solve and its host.
///
/// The solver polls the token after every residual evaluation, so a stop
/// takes effect at the next evaluation boundary and never interrupts the
/// residual function itself. A token stays stopped until [`StopToken::reset`].
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the solve holding this token terminate.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Re-arm the token for another solve.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = StopToken::new();
        let other = token.clone();
        assert!(!token.is_stopped());
        other.stop();
        assert!(token.is_stopped());
        token.reset();
        assert!(!other.is_stopped());
    }

    #[test]
    fn stop_is_visible_across_threads() {
        let token = StopToken::new();
        let remote = token.clone();
        std::thread::spawn(move || remote.stop()).join().unwrap();
        assert!(token.is_stopped());
    }
}
