mod backend;
mod mirror;
mod pending;
mod worker;

pub use backend::{HeadlessBackend, HeadlessNode, NodeId, NodeKind, RenderBackend, RenderError};
pub use mirror::{MirrorInput, RenderMirror};
pub use pending::PendingQueue;
pub use worker::{RenderHandle, RenderWorker};
