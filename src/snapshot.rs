use std::sync::{Arc, PoisonError, RwLock};

/// A value published by whole-value swap. Readers clone the current `Arc` and keep a
/// consistent view while a newer version is installed behind them.
#[derive(Debug)]
pub struct Versioned<T> {
    current: RwLock<Arc<T>>,
}

impl<T> Versioned<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the current value and returns the one it displaced.
    pub fn publish(&self, value: T) -> Arc<T> {
        let next = Arc::new(value);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }
}
