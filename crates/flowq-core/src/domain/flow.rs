//! Flow: a tree of jobs where each parent waits for its children.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::job::JobOptions;
use super::keys::{JobKey, QueueKeys};

/// Description of one node of a flow, as submitted by a producer.
///
/// `queue` defaults to the parent's queue (or the submitting queue for the
/// root), so children may live in a different namespace than their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub name: String,
    #[serde(default)]
    pub queue: Option<QueueKeys>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub opts: JobOptions,
    #[serde(default)]
    pub children: Vec<FlowNode>,
}

impl FlowNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: None,
            data: Value::Null,
            opts: JobOptions::default(),
            children: Vec::new(),
        }
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn opts(mut self, opts: JobOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.opts.job_id = Some(id.into());
        self
    }

    pub fn in_queue(mut self, queue: QueueKeys) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn child(mut self, child: FlowNode) -> Self {
        self.children.push(child);
        self
    }

    /// Number of nodes in the tree rooted here.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(FlowNode::node_count).sum::<usize>()
    }
}

/// Keys assigned to a submitted flow, mirroring its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNode {
    pub key: JobKey,
    pub children: Vec<JobNode>,
}

impl JobNode {
    /// Depth-first search for the node with `id`.
    pub fn find(&self, id: &str) -> Option<&JobNode> {
        if self.key.id() == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}
