//! Failures raised by stream callbacks on the audio thread.
//!
//! The audio thread parks the first fault in a bounded lock-free slot; the control thread
//! collects it once the stream has stopped.

use core::fmt;
use std::any::Any;

use crossbeam_queue::ArrayQueue;

#[derive(Debug, thiserror::Error)]
pub enum CallbackFault {
    #[error("stream callback failed: {0:#}")]
    Error(anyhow::Error),
    #[error("stream callback panicked: {0}")]
    Panic(PanicMessage),
}

impl CallbackFault {
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::Panic(PanicMessage::from_payload(payload))
    }
}

/// Message extracted from a panic payload without formatting on the audio thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanicMessage {
    Static(&'static str),
    Owned(String),
    Opaque,
}

impl PanicMessage {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<&'static str>() {
            Ok(message) => Self::Static(*message),
            Err(payload) => match payload.downcast::<String>() {
                Ok(message) => Self::Owned(*message),
                Err(_) => Self::Opaque,
            },
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Static(message) => *message,
            Self::Owned(message) => message.as_str(),
            Self::Opaque => "<non-string panic payload>",
        }
    }
}

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-entry mailbox for the first fault of a stream.
pub(crate) struct FaultSlot {
    slot: ArrayQueue<CallbackFault>,
}

impl FaultSlot {
    pub(crate) fn new() -> Self {
        Self {
            slot: ArrayQueue::new(1),
        }
    }

    /// Keeps the first fault; later ones are dropped. Never blocks.
    pub(crate) fn record(&self, fault: CallbackFault) -> bool {
        self.slot.push(fault).is_ok()
    }

    pub(crate) fn take(&self) -> Option<CallbackFault> {
        self.slot.pop()
    }

    pub(crate) fn is_set(&self) -> bool {
        !self.slot.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fault_wins() {
        let slot = FaultSlot::new();
        assert!(slot.record(CallbackFault::Error(anyhow::anyhow!("first"))));
        assert!(!slot.record(CallbackFault::Error(anyhow::anyhow!("second"))));
        assert!(slot.is_set());
        let fault = slot.take().expect("fault");
        assert_eq!(fault.to_string(), "stream callback failed: first");
        assert!(slot.take().is_none());
    }

    #[test]
    fn panic_payloads_keep_their_message() {
        let fault = CallbackFault::from_panic(Box::new("static boom"));
        assert_eq!(fault.to_string(), "stream callback panicked: static boom");
        let fault = CallbackFault::from_panic(Box::new(format!("owned {}", 7)));
        assert_eq!(fault.to_string(), "stream callback panicked: owned 7");
        let fault = CallbackFault::from_panic(Box::new(42u32));
        assert!(matches!(fault, CallbackFault::Panic(PanicMessage::Opaque)));
    }
}
