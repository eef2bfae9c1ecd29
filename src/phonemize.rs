//! Grapheme-to-phoneme conversion through the `espeak-ng` program.
//!
//! The ONNX graph consumes IPA produced by espeak-ng's `en-us` voice, so the
//! phonemizer is an external collaborator in the same way the model weights
//! are: this module only locates the program and runs it.

use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{bail, Context, Result};

/// Program names tried, in order, when no explicit path is configured.
pub const CANDIDATES: [&str; 2] = ["espeak-ng", "espeak"];

/// Converts text to IPA.
pub trait Phonemizer: Send + Sync {
    fn phonemize(&self, text: &str) -> Result<String>;
}

/// Runs `espeak-ng -q --ipa=3 -v en-us <text>` per call.
#[derive(Debug, Clone)]
pub struct Espeak {
    program: PathBuf,
}

impl Espeak {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    /// Find `espeak-ng` (or `espeak`) on `PATH`.
    pub fn locate() -> Result<Self> {
        CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(Self::new)
            .with_context(|| format!("no phonemizer found on PATH (tried: {})", CANDIDATES.join(", ")))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Phonemizer for Espeak {
    fn phonemize(&self, text: &str) -> Result<String> {
        let output = Command::new(&self.program)
            .args(["-q", "--ipa=3", "-v", "en-us", "--"])
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("failed to run {}", self.program.display()))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let ipa = String::from_utf8(output.stdout).context("phonemizer emitted non-UTF-8 output")?;
        // --ipa=3 separates phonemes with '_' and clauses with newlines.
        Ok(ipa
            .lines()
            .map(|line| line.trim().replace('_', ""))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_an_error() {
        let espeak = Espeak::new("/nonexistent/espeak-ng");
        let err = espeak.phonemize("hello").unwrap_err();
        assert!(err.to_string().contains("failed to run"), "{err:#}");
    }

    #[test]
    fn test_phonemize_when_installed() {
        // Only meaningful on machines with espeak-ng installed.
        let Ok(espeak) = Espeak::locate() else { return };
        let ipa = espeak.phonemize("Hello world").unwrap();
        assert!(!ipa.is_empty());
        assert!(!ipa.contains('_'), "separators should be stripped: {ipa}");
    }
}
