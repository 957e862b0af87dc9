//! Assertion helpers over execution trees

use verity_core::{TestExecution, TestStatus};

/// Assert the status of an execution
#[macro_export]
macro_rules! assert_status {
    ($execution:expr, $status:expr) => {
        assert_eq!(
            $execution.status(),
            $status,
            "Expected {} to be {:?}, got {:?} (error: {:?})",
            $execution.full_name,
            $status,
            $execution.status(),
            $execution.result.error
        )
    };
}

/// Assert the number of direct children of an execution
#[macro_export]
macro_rules! assert_child_count {
    ($execution:expr, $expected:expr) => {
        assert_eq!(
            $execution.children.len(),
            $expected,
            "Expected {} children under {}, found {}",
            $expected,
            $execution.full_name,
            $execution.children.len()
        )
    };
}

/// Number of direct children with `status`
pub fn count_children(execution: &TestExecution, status: TestStatus) -> usize {
    execution
        .children
        .iter()
        .filter(|child| child.status() == status)
        .count()
}

/// Id suffixes of direct children in order
pub fn child_suffixes(execution: &TestExecution) -> Vec<String> {
    execution
        .children
        .iter()
        .map(|child| child.item.id_suffix.clone().unwrap_or_default())
        .collect()
}
