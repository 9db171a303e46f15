//! Composable record filter tree (spec §4.5, component C7).
//!
//! A [`Filter`] is a small boolean-expression tree evaluated once per
//! candidate record at dispatch time. Leaves compare a record field against
//! a literal; `Count` samples every Nth admitted record; `RateLimit` wraps a
//! [`Moderator`] so a burst of denials still surfaces exactly one summary
//! when the burst ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use regex::Regex;

use crate::error::{ElogError, Result};
use crate::level::Level;
use crate::rate_limiter::{Moderator, ModeratorOutcome};
use crate::record::LogRecord;

/// Record field a leaf expression compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Level,
    SourceId,
    ThreadId,
    RecordId,
    Message,
}

/// Comparison applied between the extracted field value and a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    Matches,
}

#[derive(Debug, Clone)]
enum FieldValue {
    Num(u64),
    Text(String),
}

/// A single leaf comparison.
pub struct Expression {
    field: Field,
    op: Op,
    literal: FieldValue,
    pattern: Option<Regex>,
}

impl Expression {
    fn new_num(field: Field, op: Op, value: u64) -> Self {
        Expression { field, op, literal: FieldValue::Num(value), pattern: None }
    }

    fn new_text(field: Field, op: Op, value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let pattern = if op == Op::Matches {
            Some(Regex::new(&value).map_err(|e| ElogError::InvalidArgument(e.to_string()))?)
        } else {
            None
        };
        Ok(Expression { field, op, literal: FieldValue::Text(value), pattern })
    }

    fn extract(&self, record: &LogRecord) -> FieldValue {
        match self.field {
            Field::Level => FieldValue::Num(record.level.ordinal() as u64),
            Field::SourceId => FieldValue::Num(record.source_id as u64),
            Field::ThreadId => FieldValue::Num(record.thread_id),
            Field::RecordId => FieldValue::Num(record.id),
            Field::Message => FieldValue::Text(record.message.to_string()),
        }
    }

    fn eval(&self, record: &LogRecord) -> bool {
        let actual = self.extract(record);
        match (&actual, self.op, &self.literal) {
            (FieldValue::Num(a), Op::Eq, FieldValue::Num(b)) => a == b,
            (FieldValue::Num(a), Op::Ne, FieldValue::Num(b)) => a != b,
            (FieldValue::Num(a), Op::Lt, FieldValue::Num(b)) => a < b,
            (FieldValue::Num(a), Op::Le, FieldValue::Num(b)) => a <= b,
            (FieldValue::Num(a), Op::Gt, FieldValue::Num(b)) => a > b,
            (FieldValue::Num(a), Op::Ge, FieldValue::Num(b)) => a >= b,
            (FieldValue::Text(a), Op::Eq, FieldValue::Text(b)) => a == b,
            (FieldValue::Text(a), Op::Ne, FieldValue::Text(b)) => a != b,
            (FieldValue::Text(a), Op::Contains, FieldValue::Text(b)) => a.contains(b.as_str()),
            (FieldValue::Text(a), Op::Matches, FieldValue::Text(_)) => {
                self.pattern.as_ref().map(|re| re.is_match(a)).unwrap_or(false)
            }
            // Op/field-kind mismatch (e.g. `Contains` on a numeric field):
            // never matches rather than panicking.
            _ => false,
        }
    }
}

/// Result of evaluating a filter tree against one record.
pub struct FilterOutcome {
    pub admit: bool,
    /// Set when a `RateLimit` node just emitted its once-per-burst summary.
    pub burst_summary: Option<String>,
}

/// A node in the filter tree.
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// Admit exactly one record out of every `every`, counted after the
    /// gate of any enclosing node has already passed.
    Count { every: u64, seen: AtomicU64 },
    RateLimit(Moderator),
    Expression(Expression),
}

impl Filter {
    pub fn and(children: Vec<Filter>) -> Filter {
        Filter::And(children)
    }

    pub fn or(children: Vec<Filter>) -> Filter {
        Filter::Or(children)
    }

    pub fn not(inner: Filter) -> Filter {
        Filter::Not(Box::new(inner))
    }

    pub fn count(every: u64) -> Filter {
        Filter::Count { every: every.max(1), seen: AtomicU64::new(0) }
    }

    pub fn rate_limit(max: u64, window: Duration, format_key: impl Into<String>) -> Filter {
        Filter::RateLimit(Moderator::new(max, window, format_key))
    }

    pub fn numeric(field: Field, op: Op, value: u64) -> Filter {
        Filter::Expression(Expression::new_num(field, op, value))
    }

    pub fn text(field: Field, op: Op, value: impl Into<String>) -> Result<Filter> {
        Ok(Filter::Expression(Expression::new_text(field, op, value)?))
    }

    pub fn level_at_least(level: Level) -> Filter {
        Filter::numeric(Field::Level, Op::Le, level.ordinal() as u64)
    }

    /// Evaluate this node (and its subtree) against `record`.
    pub fn evaluate(&self, record: &LogRecord) -> FilterOutcome {
        match self {
            Filter::And(children) => {
                let mut summary = None;
                for child in children {
                    let outcome = child.evaluate(record);
                    summary = summary.or(outcome.burst_summary);
                    if !outcome.admit {
                        // Short-circuit: remaining children (stateful leaves
                        // like `Count`/`RateLimit` included) are never
                        // evaluated once one child has already denied.
                        return FilterOutcome { admit: false, burst_summary: summary };
                    }
                }
                FilterOutcome { admit: true, burst_summary: summary }
            }
            Filter::Or(children) => {
                let mut summary = None;
                for child in children {
                    let outcome = child.evaluate(record);
                    summary = summary.or(outcome.burst_summary);
                    if outcome.admit {
                        // Short-circuit: remaining children are never
                        // evaluated once one child has already admitted.
                        return FilterOutcome { admit: true, burst_summary: summary };
                    }
                }
                FilterOutcome { admit: false, burst_summary: summary }
            }
            Filter::Not(inner) => {
                let outcome = inner.evaluate(record);
                FilterOutcome { admit: !outcome.admit, burst_summary: outcome.burst_summary }
            }
            Filter::Count { every, seen } => {
                let n = seen.fetch_add(1, Ordering::Relaxed) + 1;
                FilterOutcome { admit: n % every == 0, burst_summary: None }
            }
            Filter::RateLimit(moderator) => match moderator.check() {
                ModeratorOutcome::Admitted => FilterOutcome { admit: true, burst_summary: None },
                ModeratorOutcome::Denied => FilterOutcome { admit: false, burst_summary: None },
                ModeratorOutcome::AdmittedAfterBurst { discarded, elapsed_ms } => FilterOutcome {
                    admit: true,
                    burst_summary: Some(format!(
                        "{}: discarded {} times in {} ms",
                        moderator.format_key(),
                        discarded,
                        elapsed_ms
                    )),
                },
            },
            Filter::Expression(expr) => FilterOutcome { admit: expr.eval(record), burst_summary: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Weak};

    fn record(level: Level, message: &str) -> LogRecord {
        LogRecord::new(0, level, Arc::from(message), Weak::new())
    }

    #[test]
    fn numeric_expression_matches() {
        let f = Filter::level_at_least(Level::Warn);
        assert!(f.evaluate(&record(Level::Error, "boom")).admit);
        assert!(!f.evaluate(&record(Level::Debug, "quiet")).admit);
    }

    #[test]
    fn text_contains_and_matches() {
        let contains = Filter::text(Field::Message, Op::Contains, "boom").unwrap();
        assert!(contains.evaluate(&record(Level::Info, "kaboom!")).admit);
        assert!(!contains.evaluate(&record(Level::Info, "quiet")).admit);

        let matches = Filter::text(Field::Message, Op::Matches, r"^\d+$").unwrap();
        assert!(matches.evaluate(&record(Level::Info, "12345")).admit);
        assert!(!matches.evaluate(&record(Level::Info, "12a45")).admit);
    }

    #[test]
    fn and_or_not_compose() {
        let tree = Filter::and(vec![
            Filter::level_at_least(Level::Warn),
            Filter::not(Filter::text(Field::Message, Op::Contains, "skip").unwrap()),
        ]);
        assert!(tree.evaluate(&record(Level::Error, "boom")).admit);
        assert!(!tree.evaluate(&record(Level::Error, "please skip this")).admit);
    }

    #[test]
    fn count_admits_every_nth() {
        let f = Filter::count(3);
        let admitted: Vec<bool> = (0..6).map(|_| f.evaluate(&record(Level::Info, "x")).admit).collect();
        assert_eq!(admitted, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn rate_limit_reports_burst_summary_once() {
        let f = Filter::rate_limit(1, Duration::from_secs(10), "hot-path");
        let rec = record(Level::Info, "x");
        assert!(f.evaluate(&rec).admit);
        let denied = f.evaluate(&rec);
        assert!(!denied.admit);
        assert!(denied.burst_summary.is_none());
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let err = Filter::text(Field::Message, Op::Matches, "(unclosed");
        assert!(err.is_err());
    }

    #[test]
    fn and_short_circuits_without_touching_later_stateful_children() {
        let count = Filter::count(2);
        let tree = Filter::and(vec![Filter::level_at_least(Level::Warn), count]);
        // The level check denies first; `Count`'s `seen` counter must never
        // advance since And stops evaluating once a child has denied.
        for _ in 0..4 {
            assert!(!tree.evaluate(&record(Level::Info, "too quiet")).admit);
        }
        let Filter::And(children) = &tree else { unreachable!() };
        let Filter::Count { seen, .. } = &children[1] else { unreachable!() };
        assert_eq!(seen.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn or_short_circuits_without_touching_later_stateful_children() {
        let count = Filter::count(2);
        let tree = Filter::or(vec![Filter::level_at_least(Level::Warn), count]);
        // The level check admits first; Or stops evaluating once a child
        // has admitted, so `Count` never sees these records either.
        for _ in 0..4 {
            assert!(tree.evaluate(&record(Level::Error, "loud")).admit);
        }
        let Filter::Or(children) = &tree else { unreachable!() };
        let Filter::Count { seen, .. } = &children[1] else { unreachable!() };
        assert_eq!(seen.load(Ordering::Relaxed), 0);
    }
}
