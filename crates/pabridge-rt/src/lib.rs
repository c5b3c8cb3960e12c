//! Real-time side of the pabridge callback bridge.
//!
//! The engine calls [`trampoline::stream_callback`] on its audio thread for every buffer and
//! [`trampoline::stream_finished`] once when the stream stops. Both resolve their opaque user
//! data through the process-wide [`registry`] to a [`CallbackContext`] holding the Rust callback.

pub mod binding;
pub mod buffer;
pub mod callback;
pub mod context;
pub mod diagnostics;
pub mod fault;
pub mod format;
pub mod registry;
pub mod timing;
pub mod trampoline;

pub use binding::{ensure_bindings, BindingError, STREAM_CALLBACK, STREAM_FINISHED_CALLBACK};
pub use buffer::{InputView, OutputView, StreamBuffer, StreamLayout};
pub use callback::{from_fn, Disposition, FinishReason, FinishedHandler, StreamCallback};
pub use context::{CallbackContext, StreamStats};
pub use diagnostics::{lifecycle_diagnostics, LifecycleDiagnostics};
pub use fault::{CallbackFault, PanicMessage};
pub use format::{FormatError, Sample, SampleFormat};
pub use registry::{ContextRegistry, RegistryError, StreamToken, REGISTRY_CAPACITY};
pub use timing::{StatusFlags, TimingSnapshot};
