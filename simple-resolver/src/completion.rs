//! Single use slot that carries the outcome of a query from the engine callback to the caller

use std::{cell::RefCell, rc::Rc};

/// Creates an empty slot and returns its writer and reader halves
pub(crate) fn completion<T>() -> (Signal<T>, Completion<T>) {
    let slot = Rc::new(RefCell::new(None));
    (Signal { slot: slot.clone() }, Completion { slot })
}

/// Writer half, consumed by the single write
pub(crate) struct Signal<T> {
    slot: Rc<RefCell<Option<T>>>,
}

impl<T> Signal<T> {
    pub fn signal(self, value: T) {
        let mut slot = self.slot.borrow_mut();
        if slot.is_some() {
            log::error!("completion signalled more than once, keeping the first outcome");
            return;
        }

        *slot = Some(value);
    }
}

/// Reader half
pub(crate) struct Completion<T> {
    slot: Rc<RefCell<Option<T>>>,
}

impl<T> Completion<T> {
    pub fn is_signalled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Consumes the reader, returning the outcome if one was ever signalled
    pub fn into_outcome(self) -> Option<T> {
        self.slot.borrow_mut().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let (_signal, completion) = completion::<u8>();
        assert!(!completion.is_signalled());
        assert_eq!(None, completion.into_outcome());
    }

    #[test]
    fn carries_the_signalled_value() {
        let (signal, completion) = completion();
        signal.signal("done");

        assert!(completion.is_signalled());
        assert_eq!(Some("done"), completion.into_outcome());
    }

    #[test]
    fn first_signal_wins() {
        let (signal, completion) = completion();
        let second = Signal {
            slot: signal.slot.clone(),
        };

        signal.signal(1);
        second.signal(2);

        assert_eq!(Some(1), completion.into_outcome());
    }

    #[test]
    fn signal_from_callback() {
        let (signal, completion) = completion();
        let callback: Box<dyn FnOnce(u16)> = Box::new(move |value| signal.signal(value));

        assert!(!completion.is_signalled());
        callback(42);
        assert_eq!(Some(42), completion.into_outcome());
    }
}
