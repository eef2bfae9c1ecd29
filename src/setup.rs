//! Environment verification run by the `check-setup` binary.
//!
//! Each check prints its findings and a remediation hint; the run ends with
//! a `Results: N/M checks passed` tally.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process::Command,
};

use semver::Version;

use crate::{device::Device, model::hub, phonemize::Espeak};

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

/// Files a working checkout must contain, relative to the project root.
pub const PROJECT_FILES: [&str; 5] = [
    "Cargo.toml",
    "src/bin/server.rs",
    "src/bin/client.rs",
    "src/bin/smoke.rs",
    "ui/index.html",
];

/// Severity of one finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pass,
    Warn,
    Fail,
}

impl Status {
    fn marker(self) -> &'static str {
        match self {
            Status::Pass => "✅",
            Status::Warn => "⚠️",
            Status::Fail => "❌",
        }
    }
}

/// Findings of one check.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub lines: Vec<(Status, String)>,
    pub hint: Option<String>,
}

impl Report {
    fn push(&mut self, status: Status, message: impl Into<String>) -> &mut Self {
        self.lines.push((status, message.into()));
        self
    }

    fn hint(&mut self, hint: impl Into<String>) -> &mut Self {
        self.hint = Some(hint.into());
        self
    }

    fn single(status: Status, message: impl Into<String>) -> Self {
        let mut report = Self::default();
        report.push(status, message);
        report
    }

    /// Warnings do not fail a check.
    pub fn passed(&self) -> bool {
        self.lines.iter().all(|(s, _)| *s != Status::Fail)
    }
}

/// Inputs shared by all checks.
#[derive(Debug, Clone)]
pub struct SetupContext {
    pub project_root: PathBuf,
    pub model_repo: String,
}

pub struct Check {
    pub name: &'static str,
    pub heading: &'static str,
    pub run: fn(&SetupContext) -> Report,
}

/// The checks, in the order they run.
pub fn checks() -> Vec<Check> {
    vec![
        Check { name: "Rust toolchain", heading: "🦀 Checking Rust toolchain...", run: check_toolchain },
        Check { name: "Cargo", heading: "📦 Checking Cargo...", run: check_cargo },
        Check { name: "Model cache", heading: "🏠 Checking HuggingFace cache...", run: check_cache },
        Check { name: "Dependencies", heading: "📚 Checking runtime dependencies...", run: check_dependencies },
        Check { name: "Model package", heading: "🗣️ Checking model package...", run: check_model },
        Check { name: "Project files", heading: "📁 Checking file structure...", run: check_project_files },
        Check { name: "Device", heading: "🖥️ Checking device compatibility...", run: check_device },
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Checks
// ─────────────────────────────────────────────────────────────────────────────

/// Run `program --version`, returning its first output line.
fn tool_version(program: &str) -> Option<String> {
    let output = Command::new(program).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|l| l.trim().to_string())
}

/// `rustc 1.82.0 (f6e511eec 2024-10-15)` → `1.82.0`.
pub fn parse_rustc_version(line: &str) -> Option<Version> {
    line.split_whitespace().nth(1).and_then(|v| Version::parse(v).ok())
}

/// Whether `found` is at least `minimum`, ignoring pre-release tags
/// (`1.84.0-nightly` counts as 1.84.0).
pub fn meets_minimum(found: &Version, minimum: &Version) -> bool {
    Version::new(found.major, found.minor, found.patch) >= *minimum
}

fn minimum_rust() -> Version {
    let declared = env!("CARGO_PKG_RUST_VERSION");
    Version::parse(declared)
        .or_else(|_| Version::parse(&format!("{declared}.0")))
        .unwrap_or_else(|_| Version::new(1, 80, 0))
}

fn check_toolchain(_: &SetupContext) -> Report {
    let minimum = minimum_rust();
    let Some(line) = tool_version("rustc") else {
        let mut r = Report::single(Status::Fail, "rustc not found");
        r.hint("Install with: curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh");
        return r;
    };
    match parse_rustc_version(&line) {
        Some(v) if meets_minimum(&v, &minimum) => Report::single(Status::Pass, format!("rustc {v} - Compatible")),
        Some(v) => {
            let mut r = Report::single(Status::Fail, format!("rustc {v} - Requires Rust {minimum}+"));
            r.hint("Update with: rustup update stable");
            r
        }
        None => Report::single(Status::Fail, format!("Cannot parse rustc version from {line:?}")),
    }
}

fn check_cargo(_: &SetupContext) -> Report {
    match tool_version("cargo") {
        Some(v) => Report::single(Status::Pass, format!("Cargo installed: {v}")),
        None => {
            let mut r = Report::single(Status::Fail, "Cargo not installed");
            r.hint("Cargo ships with rustup: https://rustup.rs");
            r
        }
    }
}

fn check_cache(_: &SetupContext) -> Report {
    let cache = hf_hub::Cache::default();
    let path = cache.path();
    if path.is_dir() {
        Report::single(Status::Pass, format!("HuggingFace cache found at {}", path.display()))
    } else {
        let mut r = Report::single(Status::Fail, format!("HuggingFace cache not found at {}", path.display()));
        r.hint("It is created on first model download: run `cargo run --bin smoke-test`");
        r
    }
}

fn check_dependencies(_: &SetupContext) -> Report {
    let mut report = Report::default();
    match Espeak::locate() {
        Ok(espeak) => report.push(Status::Pass, format!("phonemizer: {}", espeak.program().display())),
        Err(_) => report.push(Status::Fail, "espeak-ng"),
    };
    match ort::session::Session::builder() {
        Ok(_) => report.push(Status::Pass, format!("ONNX Runtime: {}", crate::model::onnx::library_version())),
        Err(e) => report.push(Status::Fail, format!("ONNX Runtime: {e}")),
    };
    if !report.passed() {
        report.hint("Install espeak-ng (apt install espeak-ng / brew install espeak-ng); ONNX Runtime is fetched at build time");
    }
    report
}

fn check_model(ctx: &SetupContext) -> Report {
    match hub::fetch_manifest(&ctx.model_repo) {
        Ok(m) => Report::single(
            Status::Pass,
            format!("{} resolves ({}, {})", hub::normalize_repo_id(&ctx.model_repo), m.model_type, m.model_file),
        ),
        Err(e) => {
            let mut r = Report::single(Status::Fail, format!("Cannot resolve {}: {e:#}", ctx.model_repo));
            r.hint("Check network access to huggingface.co or set --model to a cached repository");
            r
        }
    }
}

fn check_files_in(root: &Path) -> Report {
    let mut report = Report::default();
    for file in PROJECT_FILES {
        let status = if root.join(file).is_file() { Status::Pass } else { Status::Fail };
        report.push(status, file);
    }
    if !report.passed() {
        report.hint("Run from the repository root, or pass --project-root");
    }
    report
}

fn check_project_files(ctx: &SetupContext) -> Report {
    check_files_in(&ctx.project_root)
}

fn check_device(_: &SetupContext) -> Report {
    match Device::probe() {
        Device::Cuda => Report::single(Status::Pass, "CUDA acceleration available"),
        Device::CoreMl => Report::single(Status::Pass, "CoreML (Apple Silicon) acceleration available"),
        Device::Cpu => Report::single(Status::Warn, "CPU-only mode (slower but functional)"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runner
// ─────────────────────────────────────────────────────────────────────────────

/// Tally of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub total: usize,
}

impl Summary {
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

/// Run `checks` in order, writing the report to `out`.
pub fn run_checks(checks: &[Check], ctx: &SetupContext, out: &mut impl Write) -> io::Result<Summary> {
    let rule = "=".repeat(50);
    writeln!(out, "🔍 Speech Gateway Setup Verification")?;
    writeln!(out, "{rule}")?;

    let mut passed = 0;
    for check in checks {
        writeln!(out)?;
        writeln!(out, "{}", check.heading)?;
        let report = (check.run)(ctx);
        for (status, message) in &report.lines {
            writeln!(out, "   {} {message}", status.marker())?;
        }
        if let Some(hint) = &report.hint {
            writeln!(out, "   💡 {hint}")?;
        }
        if report.passed() {
            passed += 1;
        } else {
            tracing::debug!(check = check.name, "Check failed");
        }
    }

    let summary = Summary { passed, total: checks.len() };
    writeln!(out)?;
    writeln!(out, "{rule}")?;
    writeln!(out, "Results: {}/{} checks passed", summary.passed, summary.total)?;
    if summary.all_passed() {
        writeln!(out, "🎉 All checks passed! You're ready to go.")?;
        writeln!(out)?;
        writeln!(out, "Next steps:")?;
        writeln!(out, "1. Start the API server: cargo run --release --bin speech-gateway-server")?;
        writeln!(out, "2. Open the UI:          http://localhost:8000/ui")?;
        writeln!(out, "3. Or use the CLI:       cargo run --bin speech-gateway-client -- \"Hello\"")?;
    } else {
        writeln!(out, "⚠️ Some checks failed. Please fix the issues above.")?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(root: &Path) -> SetupContext {
        SetupContext { project_root: root.to_path_buf(), model_repo: hub::DEFAULT_REPO.into() }
    }

    #[test]
    fn test_parse_rustc_version() {
        let v = parse_rustc_version("rustc 1.82.0 (f6e511eec 2024-10-15)").unwrap();
        assert_eq!(v, Version::new(1, 82, 0));
        let nightly = parse_rustc_version("rustc 1.84.0-nightly (1e4f10ba6 2024-10-29)").unwrap();
        assert!(meets_minimum(&nightly, &Version::new(1, 84, 0)));
        assert!(parse_rustc_version("rustc").is_none());
    }

    #[test]
    fn test_minimum_version() {
        let min = Version::new(1, 80, 0);
        assert!(meets_minimum(&Version::new(1, 80, 0), &min));
        assert!(!meets_minimum(&Version::new(1, 79, 9), &min));
        assert_eq!(minimum_rust(), min);
    }

    #[test]
    fn test_project_files() {
        let dir = tempfile::tempdir().unwrap();
        let report = check_files_in(dir.path());
        assert!(!report.passed());
        assert_eq!(report.lines.len(), PROJECT_FILES.len());
        assert!(report.hint.is_some());

        for file in PROJECT_FILES {
            let path = dir.path().join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "").unwrap();
        }
        assert!(check_files_in(dir.path()).passed());
    }

    #[test]
    fn test_checkout_has_project_files() {
        assert!(check_files_in(Path::new(env!("CARGO_MANIFEST_DIR"))).passed());
    }

    #[test]
    fn test_tally_and_warnings() {
        fn pass(_: &SetupContext) -> Report {
            Report::single(Status::Pass, "ok")
        }
        fn warn(_: &SetupContext) -> Report {
            Report::single(Status::Warn, "slow")
        }
        fn fail(_: &SetupContext) -> Report {
            let mut r = Report::single(Status::Fail, "missing");
            r.hint("install it");
            r
        }
        let checks = [
            Check { name: "a", heading: "A", run: pass },
            Check { name: "b", heading: "B", run: warn },
            Check { name: "c", heading: "C", run: fail },
        ];
        let mut out = Vec::new();
        let summary = run_checks(&checks, &ctx(Path::new(".")), &mut out).unwrap();
        assert_eq!(summary, Summary { passed: 2, total: 3 });
        assert!(!summary.all_passed());

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("   ⚠️ slow"));
        assert!(text.contains("   💡 install it"));
        assert!(text.contains("Results: 2/3 checks passed"));
        assert!(text.contains("Some checks failed"));
    }

    #[test]
    fn test_listed_checks() {
        let names: Vec<_> = checks().iter().map(|c| c.name).collect();
        assert_eq!(names.len(), 7);
        assert_eq!(names[0], "Rust toolchain");
        assert_eq!(names[6], "Device");
    }
}
