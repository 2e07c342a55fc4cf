use std::env;
use std::process::Command;

/// Variable carrying the revision into `digestwatch_core::VERSION`.
const REVISION_VAR: &str = "DIGESTWATCH_GIT_SHA";

fn git_revision() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=10", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let revision = String::from_utf8(output.stdout).ok()?;
    let revision = revision.trim();
    (!revision.is_empty()).then(|| revision.to_owned())
}

fn main() {
    // Source tarballs carry no .git; packagers pass the revision instead.
    let revision = env::var(REVISION_VAR)
        .ok()
        .filter(|r| !r.trim().is_empty())
        .or_else(git_revision)
        .unwrap_or_else(|| "unknown".to_owned());

    println!("cargo:rustc-env={REVISION_VAR}={revision}");
    println!("cargo:rerun-if-env-changed={REVISION_VAR}");
    for path in ["HEAD", "refs/heads"] {
        println!("cargo:rerun-if-changed=../../.git/{path}");
    }
}
