//! Drive health sampling via `smartctl`

mod sampler;

pub(crate) use sampler::{Sampler, Snapshot, persist_snapshot, request_long_self_test};
