//! Helpers for assembling and running crews.

use std::cmp::Ordering;

use crate::task::Task;

/// Order a crew's tasks by their execution numbers.
///
/// If any task carries an `execution_number`, tasks are sorted ascending by
/// `(execution_number, name)` with unnumbered tasks last. If none does, the
/// declaration order is kept unchanged.
pub fn sort_tasks_by_execution_number(tasks: &mut [Task]) {
    if !tasks.iter().any(|t| t.execution_number.is_some()) {
        return;
    }
    tasks.sort_by(|a, b| match (a.execution_number, b.execution_number) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.name.cmp(&b.name)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, n: Option<i64>) -> Task {
        let mut t = Task::new(name, "d", "e");
        t.execution_number = n;
        t
    }

    fn names(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn test_numbered_tasks_sort_with_name_tiebreak() {
        let mut tasks = vec![
            task("zeta", Some(2)),
            task("none_b", None),
            task("beta", Some(1)),
            task("alpha", Some(2)),
            task("none_a", None),
        ];
        sort_tasks_by_execution_number(&mut tasks);
        assert_eq!(names(&tasks), vec!["beta", "alpha", "zeta", "none_a", "none_b"]);
    }

    #[test]
    fn test_unnumbered_crew_keeps_declaration_order() {
        let mut tasks = vec![task("c", None), task("a", None), task("b", None)];
        sort_tasks_by_execution_number(&mut tasks);
        assert_eq!(names(&tasks), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_order_is_non_decreasing() {
        let mut tasks: Vec<Task> = [5, 3, 9, 3, 1, 7]
            .iter()
            .enumerate()
            .map(|(i, n)| task(&format!("t{}", i), Some(*n)))
            .collect();
        sort_tasks_by_execution_number(&mut tasks);
        let numbers: Vec<i64> = tasks.iter().filter_map(|t| t.execution_number).collect();
        assert!(numbers.windows(2).all(|w| w[0] <= w[1]));
    }
}
