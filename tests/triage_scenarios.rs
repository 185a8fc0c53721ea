//! Triage engine scenarios against a mock code host.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use fleet_control::config::TriageConfig;
use fleet_control::github::{CheckState, GitHubError, MergeMethod, PrState};
use fleet_control::triage::{
    Analyzer, BlockerKind, NextAction, PrStatus, ResolveOptions, Severity, TriageEngine,
    TriageError,
};
use fleet_control::{FleetControlConfig, PollSchedule};

fn settings() -> TriageConfig {
    let mut settings = FleetControlConfig::default().triage;
    settings.ci_wait = PollSchedule::from_secs(10, 60);
    settings
}

fn engine(host: &Arc<MockCodeHost>) -> TriageEngine {
    TriageEngine::new(host.clone(), router(), Analyzer::offline(), settings())
}

fn options(max_iterations: u32) -> ResolveOptions {
    ResolveOptions {
        max_iterations,
        request_reviews: false,
        auto_merge: false,
    }
}

#[tokio::test]
async fn passing_ci_and_no_feedback_is_ready_to_merge() {
    let host = MockCodeHost::new(open_pr(7));
    host.set_checks(vec![
        check("build", CheckState::Success),
        check("lint", CheckState::Neutral),
    ]);

    let result = engine(&host).analyze(&repo(), 7).await.unwrap();

    assert_eq!(result.status, PrStatus::ReadyToMerge);
    assert!(result.blockers.is_empty());
    assert_eq!(result.next_actions, vec![NextAction::Merge]);
    assert_eq!(result.ci.passed, 2);
    assert!(result.summary.contains("ready_to_merge"));
}

#[tokio::test]
async fn one_failing_check_needs_work_with_one_fixable_blocker() {
    let host = MockCodeHost::new(open_pr(7));
    host.set_checks(vec![
        check("build", CheckState::Success),
        check("test", CheckState::Failure),
    ]);

    let result = engine(&host).analyze(&repo(), 7).await.unwrap();

    assert_eq!(result.status, PrStatus::NeedsWork);
    assert_eq!(result.blockers.len(), 1);
    assert_eq!(result.blockers[0].kind, BlockerKind::CiFailure);
    assert!(result.blockers[0].is_auto_resolvable);
    assert_eq!(
        result.next_actions,
        vec![NextAction::FixCiFailure {
            check: "test".to_string()
        }]
    );
}

#[tokio::test]
async fn merge_conflict_blocks_and_needs_a_human() {
    let mut pr = open_pr(7);
    pr.mergeable = Some(false);
    pr.mergeable_state = Some("dirty".to_string());
    let host = MockCodeHost::new(pr);
    host.set_checks(vec![check("build", CheckState::Success)]);

    let result = engine(&host).analyze(&repo(), 7).await.unwrap();

    let conflict = result
        .blockers
        .iter()
        .find(|b| b.kind == BlockerKind::MergeConflict)
        .expect("merge conflict blocker");
    assert!(!conflict.is_auto_resolvable);
    assert_eq!(result.status, PrStatus::Blocked);
    assert!(result.only_human_blockers());
}

#[tokio::test]
async fn single_iteration_with_human_blocker_reports_blocked() {
    let mut pr = open_pr(7);
    pr.mergeable = Some(false);
    pr.mergeable_state = Some("dirty".to_string());
    let host = MockCodeHost::new(pr);
    host.set_checks(vec![check("build", CheckState::Success)]);
    let executor = RecordingFixExecutor::new();

    let report = engine(&host)
        .with_executor(executor.clone())
        .run_until_ready(&repo(), 7, options(1))
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.final_status, PrStatus::Blocked);
    assert_eq!(report.iterations, 1);
    assert_eq!(executor.attempts(), 0);
}

#[tokio::test]
async fn own_review_comments_are_ignored_and_login_is_looked_up_once() {
    let host = MockCodeHost::new(open_pr(7));
    host.set_checks(vec![check("build", CheckState::Success)]);
    host.set_feedback(vec![
        comment("c1", REVIEW_LOGIN, "This is a bug, please fix"),
        comment("c2", "Fleet-Reviewer", "Another bug report from ourselves"),
    ]);
    let engine = engine(&host);

    let first = engine.analyze(&repo(), 7).await.unwrap();
    let second = engine.analyze(&repo(), 7).await.unwrap();

    assert_eq!(first.feedback.total, 0);
    assert_eq!(second.status, PrStatus::ReadyToMerge);
    assert_eq!(host.login_lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn classification_falls_back_to_keywords_when_the_model_fails() {
    let host = MockCodeHost::new(open_pr(7));
    host.set_checks(vec![check("build", CheckState::Success)]);
    host.set_feedback(vec![
        comment("c1", "alice", "This will crash on empty input"),
        comment("c2", "bob", "nit: naming"),
        comment("c3", "carol", "Thanks!"),
    ]);
    let generator = ScriptedGenerator::failing();
    let engine = TriageEngine::new(
        host.clone(),
        router(),
        Analyzer::new(generator.clone()),
        settings(),
    );

    let result = engine.analyze(&repo(), 7).await.unwrap();

    let severity = |id: &str| {
        result
            .feedback
            .items
            .iter()
            .find(|item| item.id == id)
            .map(|item| item.severity)
    };
    assert_eq!(severity("c1"), Some(Severity::Critical));
    assert_eq!(severity("c2"), Some(Severity::Low));
    assert_eq!(severity("c3"), Some(Severity::Info));
    assert_eq!(result.feedback.unaddressed, 2);
    assert_eq!(result.status, PrStatus::NeedsWork);
    assert!(result
        .blockers
        .iter()
        .any(|b| b.kind == BlockerKind::ReviewFeedback && b.is_auto_resolvable));
    assert!(generator.calls.load(Ordering::SeqCst) >= 1);
    assert!(!result.summary.is_empty());
}

#[tokio::test]
async fn merged_pr_is_success_without_further_work() {
    let mut pr = open_pr(7);
    pr.merged = true;
    pr.state = PrState::Closed;
    let host = MockCodeHost::new(pr);

    let report = engine(&host)
        .run_until_ready(&repo(), 7, options(5))
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.final_status, PrStatus::Merged);
    assert_eq!(report.iterations, 1);
}

#[tokio::test]
async fn closed_pr_is_a_failure() {
    let mut pr = open_pr(7);
    pr.state = PrState::Closed;
    let host = MockCodeHost::new(pr);

    let report = engine(&host)
        .run_until_ready(&repo(), 7, options(5))
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.final_status, PrStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn fix_then_merge_with_the_review_identity() {
    let host = MockCodeHost::new(open_pr(7));
    host.set_checks(vec![check("test", CheckState::Failure)]);

    let fixed = host.clone();
    let executor = RecordingFixExecutor::with_effect(move || {
        fixed.update_pr(|pr| pr.head_sha = "sha-2".to_string());
        fixed.set_checks(vec![check("test", CheckState::Success)]);
    });

    let report = engine(&host)
        .with_executor(executor.clone())
        .run_until_ready(
            &repo(),
            7,
            ResolveOptions {
                max_iterations: 5,
                request_reviews: true,
                auto_merge: true,
            },
        )
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.final_status, PrStatus::ReadyToMerge);
    assert_eq!(report.iterations, 2);
    assert_eq!(executor.attempts(), 1);

    let merges = host.merges.lock().unwrap().clone();
    assert_eq!(merges.len(), 1);
    assert_eq!(merges[0].credential_key, "REVIEW_TOKEN");
    assert_eq!(merges[0].request.method, MergeMethod::Squash);

    let comments = host.comments.lock().unwrap().clone();
    assert_eq!(comments.len(), settings().review_requests.len());
    assert!(comments.iter().all(|c| c.credential_key == "REVIEW_TOKEN"));
    assert!(report.merge.is_some());
}

#[tokio::test(start_paused = true)]
async fn mixed_blockers_loop_is_bounded_by_max_iterations() {
    let mut pr = open_pr(7);
    pr.mergeable_state = Some("dirty".to_string());
    let host = MockCodeHost::new(pr);
    host.set_checks(vec![check("test", CheckState::Failure)]);
    let executor = RecordingFixExecutor::new();

    let report = engine(&host)
        .with_executor(executor.clone())
        .run_until_ready(&repo(), 7, options(3))
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.final_status, PrStatus::Blocked);
    assert_eq!(report.iterations, 3);
    assert_eq!(executor.attempts(), 3);
    assert!(host.merges.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_pull_request_surfaces_a_typed_error() {
    let host = MockCodeHost::new(open_pr(7));

    let err = engine(&host).analyze(&repo(), 99).await.unwrap_err();

    assert!(matches!(
        err,
        TriageError::GitHub(GitHubError::NotFound { .. })
    ));
}

#[tokio::test]
async fn configured_merge_method_is_used_for_the_merge() {
    let host = MockCodeHost::new(open_pr(7));
    host.set_checks(vec![check("build", CheckState::Success)]);
    let mut settings = settings();
    settings.merge_method = MergeMethod::Rebase;

    let report = TriageEngine::new(host.clone(), router(), Analyzer::offline(), settings)
        .run_until_ready(
            &repo(),
            7,
            ResolveOptions {
                max_iterations: 1,
                request_reviews: false,
                auto_merge: true,
            },
        )
        .await
        .unwrap();

    assert!(report.success);
    let merges = host.merges.lock().unwrap().clone();
    assert_eq!(merges.len(), 1);
    assert_eq!(merges[0].request.method, MergeMethod::Rebase);
}

#[tokio::test]
async fn human_blockers_are_escalated_to_an_issue() {
    let host = MockCodeHost::new(open_pr(7));
    host.update_pr(|pr| {
        pr.mergeable = Some(false);
        pr.mergeable_state = Some("dirty".to_string());
    });
    host.set_checks(vec![check("test", CheckState::Failure)]);
    let engine = engine(&host);

    let triage = engine.analyze(&repo(), 7).await.unwrap();
    let issue = engine.escalate(&repo(), &triage).await.unwrap().unwrap();

    assert_eq!(issue.number, 1);
    let issues = host.issues.lock().unwrap().clone();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].credential_key, "ACME_TOKEN");
    assert!(issues[0].title.contains("#7"));
    assert!(issues[0].body.contains("merge_conflict"));
    assert!(!issues[0].body.contains("ci_failure"));
}

#[tokio::test]
async fn fixable_blockers_are_not_escalated() {
    let host = MockCodeHost::new(open_pr(7));
    host.set_checks(vec![check("test", CheckState::Failure)]);
    let engine = engine(&host);

    let triage = engine.analyze(&repo(), 7).await.unwrap();

    assert!(engine.escalate(&repo(), &triage).await.unwrap().is_none());
    assert!(host.issues.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn ci_wait_ends_on_a_permanent_read_failure() {
    let host = MockCodeHost::new(open_pr(7));
    host.set_checks(vec![check("test", CheckState::Failure)]);

    let gone = host.clone();
    let executor = RecordingFixExecutor::with_effect(move || {
        gone.update_pr(|pr| pr.number = 8);
    });

    let err = engine(&host)
        .with_executor(executor)
        .run_until_ready(&repo(), 7, options(5))
        .await
        .unwrap_err();

    assert!(matches!(err, TriageError::GitHub(GitHubError::NotFound { .. })));
    assert_eq!(host.pr_reads.load(Ordering::SeqCst), 2);
}
