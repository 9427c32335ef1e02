use std::process::Command;

// Embed the short git commit into the version banner; builds from a plain
// source archive fall back to "unknown".
fn main() {
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH_SHORT={}", git_hash);
    println!("cargo:rerun-if-changed=.git/HEAD");
}
