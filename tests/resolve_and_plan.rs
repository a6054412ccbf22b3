use std::process::Command;

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;

fn registry_toml() -> &'static str {
    r#"
[[entry]]
source_package = "nova"
canonical_upstream = "openstack/nova"
deliverable_name = "nova"
governed = true
kind = "service"
aliases = ["compute"]

[[entry]]
source_package = "nova-common"
canonical_upstream = "openstack/nova"
deliverable_name = "nova"
governed = true
kind = "service"
"#
}

#[test]
fn resolve_finds_exact_source_match() -> Result<(), Box<dyn std::error::Error>> {
    let temp = assert_fs::TempDir::new()?;
    temp.child("registry.toml").write_str(registry_toml())?;

    let mut cmd = Command::cargo_bin("packastack")?;
    cmd.arg("--workspace").arg(temp.path()).arg("resolve").arg("nova");
    cmd.assert().success().stdout(predicate::str::contains("nova"));

    temp.close()?;
    Ok(())
}

#[test]
fn resolve_prefix_target_matches_single_alias() -> Result<(), Box<dyn std::error::Error>> {
    let temp = assert_fs::TempDir::new()?;
    temp.child("registry.toml").write_str(registry_toml())?;

    let mut cmd = Command::cargo_bin("packastack")?;
    cmd.arg("--workspace").arg(temp.path()).arg("resolve").arg("^compute");
    cmd.assert().success().stdout(predicate::str::contains("nova"));

    temp.close()?;
    Ok(())
}

#[test]
fn resolve_unknown_target_fails() -> Result<(), Box<dyn std::error::Error>> {
    let temp = assert_fs::TempDir::new()?;
    temp.child("registry.toml").write_str(registry_toml())?;

    let mut cmd = Command::cargo_bin("packastack")?;
    cmd.arg("--workspace").arg(temp.path()).arg("resolve").arg("does-not-exist");
    cmd.assert().failure();

    temp.close()?;
    Ok(())
}

#[test]
fn plan_emits_a_manifest_with_one_entry_per_matched_package() -> Result<(), Box<dyn std::error::Error>> {
    let temp = assert_fs::TempDir::new()?;
    temp.child("registry.toml").write_str(registry_toml())?;

    let mut cmd = Command::cargo_bin("packastack")?;
    cmd.arg("--workspace").arg(temp.path()).arg("plan").arg("2024.1").arg("nova").arg("nova-common");
    cmd.assert().success().stdout(predicate::str::contains("\"series\": \"2024.1\""));

    temp.close()?;
    Ok(())
}

#[test]
fn build_one_fails_offline_when_no_repo_cache_exists() -> Result<(), Box<dyn std::error::Error>> {
    let temp = assert_fs::TempDir::new()?;

    let mut cmd = Command::cargo_bin("packastack")?;
    cmd.arg("--workspace").arg(temp.path()).arg("build-one").arg("nova").arg("--offline");
    cmd.assert().failure();

    temp.close()?;
    Ok(())
}
