//! Loop termination heuristics (§4.5 "Termination heuristics", §9 "Retained
//! termination policy").
//!
//! A fixed iteration cap alone either over-stops (killing a legitimate
//! 3-4 step plan) or under-stops (letting a confused model thrash). The
//! composite rule below converges in practice: evidence of progress earns
//! extra turns, evidence of failure short-circuits. Any one of the four
//! conditions stops the loop.

use qcode_types::ToolResult;

/// Why the loop stopped, for tracing and tests. Not part of the public
/// `EngineResponse` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TwoSuccesses,
    ThreeRecentFailures,
    IterationCap,
    FailureAfterSuccess,
}

/// Evaluated once per completed iteration (after dispatching every tool
/// call the model proposed that turn).
///
/// - `all_results`: every `ToolResult` dispatched so far this query, in
///   order.
/// - `iteration_results`: just the results dispatched in the iteration
///   that just completed (a subslice of the tail of `all_results`).
/// - `had_success_before_iteration`: whether any prior iteration already
///   produced a success.
/// - `iterations_completed`: count of tool-phase iterations finished so
///   far, including this one.
#[must_use]
pub fn evaluate(
    all_results: &[ToolResult],
    iteration_results: &[ToolResult],
    had_success_before_iteration: bool,
    iterations_completed: usize,
) -> Option<StopReason> {
    let successes = all_results.iter().filter(|r| r.success).count();
    if successes >= 2 {
        return Some(StopReason::TwoSuccesses);
    }

    if all_results.len() >= 3 && all_results[all_results.len() - 3..].iter().all(|r| !r.success) {
        return Some(StopReason::ThreeRecentFailures);
    }

    if iterations_completed >= 5 {
        return Some(StopReason::IterationCap);
    }

    if had_success_before_iteration && iteration_results.iter().any(|r| !r.success) {
        return Some(StopReason::FailureAfterSuccess);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> ToolResult {
        ToolResult::ok("internal", "files", 1, serde_json::json!({}))
    }

    fn err() -> ToolResult {
        ToolResult::err("internal", "files", 1, "boom")
    }

    #[test]
    fn continues_with_no_signal() {
        let all = vec![ok()];
        assert_eq!(evaluate(&all, &all, false, 1), None);
    }

    #[test]
    fn stops_after_two_successes() {
        let all = vec![ok(), ok()];
        assert_eq!(evaluate(&all, &[ok()], true, 2), Some(StopReason::TwoSuccesses));
    }

    #[test]
    fn stops_after_three_consecutive_failures() {
        let all = vec![err(), err(), err()];
        assert_eq!(evaluate(&all, &[err()], false, 3), Some(StopReason::ThreeRecentFailures));
    }

    #[test]
    fn three_recent_failures_ignores_earlier_success() {
        let all = vec![ok(), err(), err(), err()];
        assert_eq!(evaluate(&all, &[err()], true, 4), Some(StopReason::ThreeRecentFailures));
    }

    #[test]
    fn stops_at_iteration_cap() {
        let all = vec![err()];
        assert_eq!(evaluate(&all, &[err()], false, 5), Some(StopReason::IterationCap));
    }

    #[test]
    fn stops_on_failure_after_prior_success() {
        let all = vec![ok(), err()];
        assert_eq!(
            evaluate(&all, &[err()], true, 2),
            Some(StopReason::FailureAfterSuccess)
        );
    }

    #[test]
    fn no_failure_after_success_when_no_prior_success() {
        let all = vec![err()];
        assert_eq!(evaluate(&all, &[err()], false, 1), None);
    }
}
