//! Domain model (keys, job records, states, events, flows, removal modes).

pub mod errors;
pub mod events;
pub mod flow;
pub mod job;
pub mod keys;
pub mod removal;
pub mod state;

pub use self::errors::{FlowError, FlowResult};
pub use self::events::{EventKind, QueueEvent, RecordedEvent};
pub use self::flow::{FlowNode, JobNode};
pub use self::job::{JobOptions, JobRecord, ParentFailurePolicy};
pub use self::keys::{JobKey, QueueKeys, validate_job_id};
pub use self::removal::{ParentAction, RemovalMode};
pub use self::state::{ContainerShape, JobState};
