//! Task trait - ジョブ名と payload 型の対応付け

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Ties a job name to the type of its `data` and of its return value.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Resize {
///     url: String,
///     width: u32,
/// }
///
/// impl Task for Resize {
///     const NAME: &'static str = "images.resize";
///     type Output = String;
/// }
/// ```
///
/// `NAME` is both the job name producers use and the processor path a
/// sandboxed child is initialised with.
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;

    /// Stored as the job's return value and in the parent's processed map.
    type Output: Serialize + Send;
}
