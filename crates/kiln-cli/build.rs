//! Build script to derive version from git tags
//!
//! The binary reports the tag it was built from, falling back to the
//! Cargo.toml version outside a git checkout.

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    let version = std::process::Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty=-dev"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().trim_start_matches('v').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo:rustc-env=KILN_VERSION={version}");
}
