//! Sandboxed execution: a supervisor and a child that only talk through
//! serialized messages.

pub mod child;
pub mod message;
pub mod runner;

pub use self::child::{ChildExit, ChildProcessor, ChildStatus};
pub use self::message::{ChildMessage, JobPayload, ParentMessage, SerializedError, decode_line, encode_line};
pub use self::runner::SandboxRunner;
