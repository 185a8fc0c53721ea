//! Deterministic blocker and status rules. No I/O, no model calls: every
//! function here is a pure function of its inputs.

use crate::github::{PrState, PullRequestInfo};

use super::types::{Blocker, BlockerKind, CiStatus, FeedbackSummary, NextAction, PrStatus};

pub fn identify_blockers(
    pr: &PullRequestInfo,
    ci: &CiStatus,
    feedback: &FeedbackSummary,
) -> Vec<Blocker> {
    let mut blockers: Vec<Blocker> = ci
        .failed_checks()
        .map(|check| Blocker {
            kind: BlockerKind::CiFailure,
            description: match &check.summary {
                Some(summary) => format!("CI check '{}' failed: {summary}", check.name),
                None => format!("CI check '{}' failed", check.name),
            },
            is_auto_resolvable: true,
            related: vec![check.name.clone()],
            suggested_fix: check
                .url
                .as_ref()
                .map(|url| format!("Inspect the failing run at {url} and fix the cause")),
        })
        .collect();

    let serious: Vec<_> = feedback
        .unaddressed_items()
        .filter(|item| item.severity.is_blocking())
        .collect();
    if !serious.is_empty() {
        blockers.push(Blocker {
            kind: BlockerKind::ReviewFeedback,
            description: format!(
                "{} unaddressed critical/high review comment(s)",
                serious.len()
            ),
            is_auto_resolvable: serious.iter().any(|item| item.is_auto_resolvable),
            related: serious.iter().map(|item| item.id.clone()).collect(),
            suggested_fix: Some("Address the review comments and push the changes".to_string()),
        });
    }

    match pr.mergeable_state.as_deref() {
        Some("dirty") => blockers.push(Blocker {
            kind: BlockerKind::MergeConflict,
            description: format!(
                "Branch '{}' conflicts with '{}'",
                pr.head_branch, pr.base_branch
            ),
            is_auto_resolvable: false,
            related: Vec::new(),
            suggested_fix: Some(format!(
                "Merge or rebase onto '{}' and resolve the conflicts",
                pr.base_branch
            )),
        }),
        Some("blocked") => blockers.push(Blocker {
            kind: BlockerKind::BranchProtection,
            description: "Branch protection rules prevent merging".to_string(),
            is_auto_resolvable: false,
            related: Vec::new(),
            suggested_fix: Some("Obtain the required approvals or checks".to_string()),
        }),
        _ => {}
    }

    blockers
}

pub fn determine_status(
    pr: &PullRequestInfo,
    ci: &CiStatus,
    blockers: &[Blocker],
    unaddressed_feedback: usize,
) -> PrStatus {
    if pr.merged {
        PrStatus::Merged
    } else if pr.state == PrState::Closed {
        PrStatus::Closed
    } else if blockers.iter().any(|b| !b.is_auto_resolvable) {
        PrStatus::Blocked
    } else if ci.pending > 0 {
        PrStatus::NeedsCi
    } else if ci.failed > 0 || unaddressed_feedback > 0 {
        PrStatus::NeedsWork
    } else if ci.all_passing() && unaddressed_feedback == 0 {
        PrStatus::ReadyToMerge
    } else {
        PrStatus::NeedsReview
    }
}

pub fn next_actions(
    status: PrStatus,
    ci: &CiStatus,
    feedback: &FeedbackSummary,
    blockers: &[Blocker],
) -> Vec<NextAction> {
    if matches!(status, PrStatus::Merged | PrStatus::Closed) {
        return Vec::new();
    }

    let mut actions = Vec::new();
    for blocker in blockers {
        match blocker.kind {
            BlockerKind::CiFailure => actions.extend(
                blocker
                    .related
                    .iter()
                    .map(|check| NextAction::FixCiFailure { check: check.clone() }),
            ),
            BlockerKind::ReviewFeedback => actions.push(NextAction::AddressFeedback {
                items: blocker.related.clone(),
            }),
            BlockerKind::MergeConflict => actions.push(NextAction::ResolveMergeConflict),
            BlockerKind::BranchProtection => actions.push(NextAction::SatisfyBranchProtection),
        }
    }

    let has_feedback_action = actions
        .iter()
        .any(|a| matches!(a, NextAction::AddressFeedback { .. }));
    if !has_feedback_action && feedback.unaddressed > 0 {
        actions.push(NextAction::AddressFeedback {
            items: feedback.unaddressed_items().map(|i| i.id.clone()).collect(),
        });
    }
    if ci.pending > 0 {
        actions.push(NextAction::WaitForCi);
    }
    match status {
        PrStatus::ReadyToMerge => actions.push(NextAction::Merge),
        PrStatus::NeedsReview => actions.push(NextAction::RequestReview),
        _ => {}
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{CheckState, CiCheck};
    use crate::triage::types::{FeedbackItem, FeedbackStatus, Severity};

    fn pr() -> PullRequestInfo {
        PullRequestInfo {
            number: 7,
            url: "https://github.com/acme/widgets/pull/7".into(),
            title: "Add widgets".into(),
            state: PrState::Open,
            merged: false,
            mergeable: Some(true),
            mergeable_state: Some("clean".into()),
            head_branch: "feature".into(),
            head_sha: "abc".into(),
            base_branch: "main".into(),
            node_id: None,
            author: None,
        }
    }

    fn check(name: &str, state: CheckState) -> CiCheck {
        CiCheck { name: name.into(), state, url: None, summary: None }
    }

    fn item(id: &str, severity: Severity, auto: bool) -> FeedbackItem {
        FeedbackItem {
            id: id.into(),
            author: "reviewer".into(),
            body: "please fix".into(),
            path: None,
            line: None,
            severity,
            status: FeedbackStatus::Unaddressed,
            is_auto_resolvable: auto,
            suggested_action: None,
        }
    }

    #[test]
    fn one_blocker_per_failed_check() {
        let ci = CiStatus::from_checks(vec![
            check("lint", CheckState::Failure),
            check("test", CheckState::Failure),
            check("build", CheckState::Success),
        ]);
        let blockers = identify_blockers(&pr(), &ci, &FeedbackSummary::default());
        assert_eq!(blockers.len(), 2);
        assert!(blockers.iter().all(|b| b.kind == BlockerKind::CiFailure && b.is_auto_resolvable));
    }

    #[test]
    fn review_blocker_resolvability_is_any_of_items() {
        let feedback = FeedbackSummary::new(vec![
            item("a", Severity::Critical, false),
            item("b", Severity::High, true),
            item("c", Severity::Low, false),
        ]);
        let blockers = identify_blockers(&pr(), &CiStatus::default(), &feedback);
        assert_eq!(blockers.len(), 1);
        assert_eq!(blockers[0].kind, BlockerKind::ReviewFeedback);
        assert!(blockers[0].is_auto_resolvable);
        assert_eq!(blockers[0].related, vec!["a", "b"]);
    }

    #[test]
    fn protected_branch_blocks() {
        let mut pr = pr();
        pr.mergeable_state = Some("blocked".into());
        let ci = CiStatus::from_checks(vec![check("test", CheckState::Success)]);
        let blockers = identify_blockers(&pr, &ci, &FeedbackSummary::default());
        assert_eq!(blockers[0].kind, BlockerKind::BranchProtection);
        assert_eq!(determine_status(&pr, &ci, &blockers, 0), PrStatus::Blocked);
    }

    #[test]
    fn status_rules_apply_in_order() {
        let passing = CiStatus::from_checks(vec![check("test", CheckState::Success)]);
        let pending = CiStatus::from_checks(vec![
            check("test", CheckState::Pending),
            check("lint", CheckState::Failure),
        ]);

        let mut merged = pr();
        merged.merged = true;
        merged.state = PrState::Closed;
        assert_eq!(determine_status(&merged, &passing, &[], 0), PrStatus::Merged);

        let mut closed = pr();
        closed.state = PrState::Closed;
        assert_eq!(determine_status(&closed, &passing, &[], 0), PrStatus::Closed);

        assert_eq!(determine_status(&pr(), &pending, &[], 0), PrStatus::NeedsCi);
        assert_eq!(determine_status(&pr(), &passing, &[], 2), PrStatus::NeedsWork);
        assert_eq!(determine_status(&pr(), &passing, &[], 0), PrStatus::ReadyToMerge);
        assert_eq!(
            determine_status(&pr(), &CiStatus::default(), &[], 0),
            PrStatus::NeedsReview
        );
    }

    #[test]
    fn next_actions_follow_blockers_and_status() {
        let ci = CiStatus::from_checks(vec![
            check("test", CheckState::Failure),
            check("e2e", CheckState::Pending),
        ]);
        let feedback = FeedbackSummary::new(vec![item("n1", Severity::Low, true)]);
        let blockers = identify_blockers(&pr(), &ci, &feedback);
        let status = determine_status(&pr(), &ci, &blockers, feedback.unaddressed);
        let actions = next_actions(status, &ci, &feedback, &blockers);

        assert_eq!(
            actions,
            vec![
                NextAction::FixCiFailure { check: "test".into() },
                NextAction::AddressFeedback { items: vec!["n1".into()] },
                NextAction::WaitForCi,
            ]
        );

        let ready = CiStatus::from_checks(vec![check("test", CheckState::Success)]);
        assert_eq!(
            next_actions(PrStatus::ReadyToMerge, &ready, &FeedbackSummary::default(), &[]),
            vec![NextAction::Merge]
        );
    }
}
