//! Run lifecycle: the execution ledger and the controller that owns it

mod controller;
mod record;

pub use controller::{RunController, RunHandle};
pub use record::{
    CANCELLED_REASON, EntryKind, PostActionRecord, RunRecord, SharedRecord, StageCompletion,
    StageEntry,
};
