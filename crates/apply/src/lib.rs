//! Tessera apply: shard builder, create-or-update handler and spec diffs.

#![forbid(unsafe_code)]

mod builder;
mod diff;
mod handler;

pub use builder::{build_shard, shard_name};
pub use diff::{diff_summary, spec_diff, DiffSummary};
pub use handler::{foreign_owner, in_sync, ReconcileOutcome, ShardHandler};
