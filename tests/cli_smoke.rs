use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn fleet_control(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("fleet-control").unwrap();
    cmd.current_dir(dir.path()).env_clear();
    cmd
}

#[test]
fn help_lists_the_command_groups() {
    let dir = TempDir::new().unwrap();
    fleet_control(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tokens"))
        .stdout(predicate::str::contains("agents"))
        .stdout(predicate::str::contains("triage"))
        .stdout(predicate::str::contains("handoff"));
}

#[test]
fn token_validation_fails_without_credentials() {
    let dir = TempDir::new().unwrap();
    fleet_control(&dir)
        .args(["tokens", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("missing"))
        .stdout(predicate::str::contains("GITHUB_REVIEW_TOKEN"));
}

#[test]
fn token_validation_checks_routed_organizations() {
    let dir = TempDir::new().unwrap();
    fleet_control(&dir)
        .env("GITHUB_TOKEN", "ghp_default")
        .env("GITHUB_REVIEW_TOKEN", "ghp_review")
        .env("FLEET_CONTROL_ORG_TOKENS", "acme:ACME_TOKEN")
        .args(["tokens", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("ACME_TOKEN"));
}

#[test]
fn token_validation_passes_when_every_slot_has_a_value() {
    let dir = TempDir::new().unwrap();
    fleet_control(&dir)
        .env("GITHUB_TOKEN", "ghp_default")
        .env("GITHUB_REVIEW_TOKEN", "ghp_review")
        .args(["tokens", "validate", "--org", "acme"])
        .assert()
        .success();
}

#[test]
fn config_file_routes_are_honored() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("fleet-control.toml"),
        r#"
[tokens]
default_key = "GITHUB_TOKEN"
review_identity_key = "BOT_TOKEN"

[[tokens.organizations]]
name = "acme"
token_key = "ACME_TOKEN"
"#,
    )
    .unwrap();

    fleet_control(&dir)
        .env("GITHUB_TOKEN", "ghp_default")
        .env("BOT_TOKEN", "ghp_bot")
        .env("ACME_TOKEN", "ghp_acme")
        .args(["tokens", "validate"])
        .assert()
        .success();
}

#[test]
fn takeover_rejects_an_unknown_merge_method_before_doing_anything() {
    let dir = TempDir::new().unwrap();
    fleet_control(&dir)
        .env("AGENT_API_KEY", "key")
        .env("GITHUB_TOKEN", "ghp_default")
        .args([
            "handoff",
            "takeover",
            "bc-1",
            "7",
            "agent-2/next",
            "--merge-method",
            "octopus",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("octopus"));
}
