//! Remote-sink-facing trait surface (spec §9 open question (iii), §6
//! "Wire framing for message-based sinks") [SUPPLEMENT].
//!
//! Concrete remote sinks (DB/HTTP/gRPC/Kafka/Grafana/message-based
//! collectors) are out of scope (spec.md §11 Non-goals): this module only
//! specifies the boundary a remote sink plugs into, so the retry/backlog
//! bookkeeping structure spec.md §6 commits to (`Timeout`/backoff, a
//! resend backlog) has somewhere concrete to live even though this crate
//! ships no collector behind it.

use crate::error::ElogError;

/// What a [`RemoteSink`] does with a record still in its resend backlog
/// when the remote collector reports [`crate::error::ElogError::ServerError`]
/// (open question (iii), resolved here rather than hardcoded one way).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacklogPolicy {
    /// Keep the record in the backlog for a later resend attempt.
    Keep,
    /// Drop the record immediately; the collector's rejection is treated as
    /// terminal for that record.
    ExpireImmediately,
}

/// Boundary a remote sink (none shipped in this crate) implements on top of
/// [`crate::target::Target`] to participate in resend/backlog bookkeeping.
pub trait RemoteSink: crate::target::Target {
    /// This sink's backlog policy for `ServerError` responses.
    fn backlog_policy(&self) -> BacklogPolicy;

    /// `true` iff a record that failed with `error` should stay in the
    /// backlog for a later resend, per this sink's policy. Only
    /// `ServerError` is policy-governed; every other error kind is treated
    /// as transport-level and always eligible for retry.
    fn should_retain_in_backlog(&self, error: &ElogError) -> bool {
        match error {
            ElogError::ServerError { .. } => self.backlog_policy() == BacklogPolicy::Keep,
            _ => true,
        }
    }
}
