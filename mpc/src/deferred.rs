use std::{cell::RefCell, rc::Rc};

/// Handle to a value that a native protocol or a sub-computation will produce
/// during evaluation.
///
/// A deferred result is fulfilled exactly once. Reading it before fulfilment
/// and fulfilling it twice are programming errors and panic.
pub struct Deferred<T>(Rc<RefCell<State<T>>>);

enum State<T> {
    Pending,
    Ready(T),
    Failed(&'static str),
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred(self.0.clone())
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deferred<T> {
    /// Create a pending deferred result.
    pub fn new() -> Self {
        Deferred(Rc::new(RefCell::new(State::Pending)))
    }

    /// Create a deferred result that is ready from the start.
    pub fn ready(value: T) -> Self {
        Deferred(Rc::new(RefCell::new(State::Ready(value))))
    }

    /// Whether the value can be read.
    pub fn is_ready(&self) -> bool {
        matches!(*self.0.borrow(), State::Ready(_))
    }

    /// Fulfil the deferred result.
    pub fn fulfil(&self, value: T) {
        let mut state = self.0.borrow_mut();
        match *state {
            State::Pending => *state = State::Ready(value),
            _ => panic!("Deferred result fulfilled twice"),
        }
    }

    /// Mark the deferred result as failed. Results that are already ready
    /// keep their value.
    pub fn fail(&self, reason: &'static str) {
        let mut state = self.0.borrow_mut();
        if let State::Pending = *state {
            *state = State::Failed(reason);
        }
    }
}

impl<T: Clone> Deferred<T> {
    /// Read the value. Panics if the result is still pending or has failed.
    pub fn value(&self) -> T {
        match &*self.0.borrow() {
            State::Ready(value) => value.clone(),
            State::Pending => panic!("Deferred result read before it was fulfilled"),
            State::Failed(reason) => panic!("Deferred result failed: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fulfil_and_read() {
        let deferred = Deferred::new();
        assert!(!deferred.is_ready());
        deferred.fulfil(42);
        assert!(deferred.is_ready());
        assert_eq!(deferred.value(), 42);
        assert_eq!(deferred.clone().value(), 42);
    }

    #[test]
    fn test_ready_variant() {
        let deferred = Deferred::ready("eager");
        assert!(deferred.is_ready());
        assert_eq!(deferred.value(), "eager");
    }

    #[test]
    #[should_panic(expected = "read before it was fulfilled")]
    fn test_read_before_fulfilment_panics() {
        Deferred::<u32>::new().value();
    }

    #[test]
    #[should_panic(expected = "fulfilled twice")]
    fn test_double_fulfilment_panics() {
        let deferred = Deferred::new();
        deferred.fulfil(1);
        deferred.fulfil(2);
    }

    #[test]
    #[should_panic(expected = "failed: session aborted")]
    fn test_failed_read_panics() {
        let deferred = Deferred::<u32>::new();
        deferred.fail("session aborted");
        deferred.value();
    }
}
