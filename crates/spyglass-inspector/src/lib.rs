//! spyglass-inspector: the CDP side of the bridge.
//!
//! This crate turns Chrome DevTools Protocol commands into V8 debugger
//! protocol requests and debuggee events back into CDP notifications. It
//! handles script identity, pauses, live edit, code injection and the
//! per-domain agents.

pub mod agents;
pub mod break_handler;
pub mod cdp;
pub mod dispatch;
pub mod error;
pub mod injector;
pub mod live_edit;
pub mod remote_object;
pub mod scripts;
pub mod session;

// Re-export key types for convenience.
pub use break_handler::{BreakOutcome, PauseState};
pub use cdp::{Command, Frontend};
pub use dispatch::Dispatcher;
pub use error::InspectorError;
pub use injector::{Injection, Injector, InjectorState};
pub use live_edit::ScriptFileStorage;
pub use scripts::{Script, ScriptManager};
pub use session::{Session, SessionContext};
