//! Boundary scenario: records logged before any target is registered are
//! buffered, then replayed in order the moment the first target arrives,
//! and never replayed again for records issued afterward.

mod common;

use std::sync::Arc;

use elog_core::level::Level;
use elog_core::logger::Logger;
use elog_core::registry::Registry;
use elog_core::source::SourceTree;

use common::RecordingTarget;

#[test]
fn preinit_records_replay_in_order_before_later_records() {
    let tree = Arc::new(SourceTree::new());
    let registry = Arc::new(Registry::new(tree.clone()));
    let logger = Logger::new_shared(tree.root(), registry.clone());

    // Nothing is registered yet: these three go into the pre-init buffer.
    logger.log_no_format(Level::Info, "pre-1");
    logger.log_no_format(Level::Info, "pre-2");
    logger.log_no_format(Level::Info, "pre-3");
    assert_eq!(registry.preinit_dropped_count(), 0);

    // Installing the first target drains the buffer through real dispatch,
    // in order, before the call returns.
    let target = RecordingTarget::new(0, None);
    registry.add_target(target.clone()).unwrap();
    assert_eq!(target.lines(), vec!["pre-1".to_string(), "pre-2".to_string(), "pre-3".to_string()]);

    // Records issued after the first target exists go straight through and
    // are never confused with a second replay.
    logger.log_no_format(Level::Info, "post-1");
    logger.log_no_format(Level::Info, "post-2");
    assert_eq!(
        target.lines(),
        vec!["pre-1".to_string(), "pre-2".to_string(), "pre-3".to_string(), "post-1".to_string(), "post-2".to_string()]
    );
}

#[test]
fn a_target_added_after_the_first_does_not_see_the_replay() {
    let tree = Arc::new(SourceTree::new());
    let registry = Arc::new(Registry::new(tree.clone()));
    let logger = Logger::new_shared(tree.root(), registry.clone());

    logger.log_no_format(Level::Info, "early");

    let first = RecordingTarget::new(0, None);
    registry.add_target(first.clone()).unwrap();
    assert_eq!(first.lines(), vec!["early".to_string()]);

    let second = RecordingTarget::new(1, None);
    registry.add_target(second.clone()).unwrap();
    assert!(second.lines().is_empty(), "a target registered after the replay must not retroactively see pre-init records");

    logger.log_no_format(Level::Info, "later");
    assert_eq!(first.lines(), vec!["early".to_string(), "later".to_string()]);
    assert_eq!(second.lines(), vec!["later".to_string()]);
}
