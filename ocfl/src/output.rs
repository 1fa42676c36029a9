//! Output formatting for CLI commands.
//!
//! Every command produces a serializable DTO; text mode renders it with a
//! closure instead.

use anyhow::Result;
use chrono::{DateTime, Utc};
use ocfl_core::{
    Digest, ObjectSummary, StateEntry, User, VerificationReport, Version, VersionDiff, VersionId,
};
use serde::Serialize;
use std::fmt::Write as _;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    /// Write output using the configured format.
    ///
    /// `text_fn` is only called in text mode.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write an error to stderr, as a JSON object in JSON mode.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// Output for `init` command.
#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub result_code: u8,
    pub root: String,
    pub layout: String,
}

/// What an `update` or `rm` did.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStatus {
    Committed,
    Unchanged,
    DryRun,
}

/// Output for `update` and `rm` commands.
#[derive(Debug, Serialize)]
pub struct UpdateOutput {
    pub success: bool,
    pub result_code: u8,
    pub id: String,
    pub status: UpdateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<VersionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<VersionDiff>,
}

impl UpdateOutput {
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self.status {
            UpdateStatus::Committed => {
                if let Some(head) = self.head {
                    let _ = writeln!(out, "Committed {} of {}", head, self.id);
                }
            }
            UpdateStatus::Unchanged => {
                let _ = writeln!(out, "No changes to {}", self.id);
            }
            UpdateStatus::DryRun => {
                if let Some(head) = self.head {
                    let _ = writeln!(out, "Would commit {} of {}", head, self.id);
                }
            }
        }
        if let Some(changes) = &self.changes {
            out.push_str(&render_diff(changes));
        }
        out
    }
}

/// One version in `log` output.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub version: VersionId,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub files: usize,
}

impl From<&Version> for VersionInfo {
    fn from(version: &Version) -> Self {
        Self {
            version: version.id,
            created: version.created,
            message: version.message.clone(),
            user: version.user.clone(),
            files: version.file_count(),
        }
    }
}

/// Output for `log` command.
#[derive(Debug, Serialize)]
pub struct LogOutput {
    pub success: bool,
    pub result_code: u8,
    pub id: String,
    pub versions: Vec<VersionInfo>,
}

impl LogOutput {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for info in self.versions.iter().rev() {
            let _ = write!(
                out,
                "{} {} {} file(s)",
                info.version,
                info.created.format("%Y-%m-%d %H:%M:%S"),
                info.files
            );
            if let Some(user) = &info.user {
                let _ = write!(out, " [{}]", user.name);
            }
            if let Some(message) = &info.message {
                let _ = write!(out, " {}", message);
            }
            out.push('\n');
        }
        out
    }
}

/// A file of a version in `show` output.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub logical_path: String,
    pub path: String,
    pub hash: Digest,
    pub version: VersionId,
}

impl From<&StateEntry> for FileInfo {
    fn from(entry: &StateEntry) -> Self {
        Self {
            logical_path: entry.logical_path.clone(),
            path: entry.path.clone(),
            hash: entry.hash.clone(),
            version: entry.version,
        }
    }
}

/// Output for `show` command.
#[derive(Debug, Serialize)]
pub struct ShowOutput {
    pub success: bool,
    pub result_code: u8,
    pub id: String,
    #[serde(flatten)]
    pub version: VersionInfo,
    pub entries: Vec<FileInfo>,
}

impl ShowOutput {
    pub fn render(&self, long: bool) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            if long {
                let _ = writeln!(
                    out,
                    "{} {} {}",
                    entry.hash.short(),
                    entry.path,
                    entry.logical_path
                );
            } else {
                let _ = writeln!(out, "{}", entry.logical_path);
            }
        }
        out
    }
}

/// Output for `diff` command.
#[derive(Debug, Serialize)]
pub struct DiffOutput {
    pub success: bool,
    pub result_code: u8,
    pub id: String,
    pub previous: VersionId,
    pub next: VersionId,
    pub diff: VersionDiff,
}

/// Output for `verify` command.
#[derive(Debug, Serialize)]
pub struct VerifyOutput {
    pub success: bool,
    pub result_code: u8,
    pub id: String,
    #[serde(flatten)]
    pub report: VerificationReport,
}

impl VerifyOutput {
    pub fn render(&self) -> String {
        if self.report.is_valid {
            return format!("{}: OK\n", self.id);
        }
        let mut out = format!("{}: {} error(s)\n", self.id, self.report.errors.len());
        for error in &self.report.errors {
            let _ = writeln!(out, "  {}", error);
        }
        out
    }
}

/// Output for `export` command.
#[derive(Debug, Serialize)]
pub struct ExportOutput {
    pub success: bool,
    pub result_code: u8,
    pub id: String,
    pub version: String,
    pub destination: String,
    pub files: usize,
}

/// Output for `remove` command.
#[derive(Debug, Serialize)]
pub struct RemoveOutput {
    pub success: bool,
    pub result_code: u8,
    pub id: String,
}

/// Output for `ls` command.
#[derive(Debug, Serialize)]
pub struct LsOutput {
    pub success: bool,
    pub result_code: u8,
    pub objects: Vec<ObjectSummary>,
}

impl LsOutput {
    pub fn render(&self, long: bool) -> String {
        if self.objects.is_empty() {
            return "No objects (use 'ocfl update' to create one)\n".to_string();
        }
        let mut out = String::new();
        for object in &self.objects {
            if long {
                let _ = writeln!(out, "{} {} {}", object.head, object.id, object.path);
            } else {
                let _ = writeln!(out, "{}", object.id);
            }
        }
        out
    }
}

/// `+`/`-` listing of the files that differ between two versions.
pub fn render_diff(diff: &VersionDiff) -> String {
    let mut out = String::new();
    for path in &diff.previous {
        let _ = writeln!(out, "- {}", path);
    }
    for path in &diff.next {
        let _ = writeln!(out, "+ {}", path);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff() -> VersionDiff {
        VersionDiff {
            same: vec!["v1/content/a.txt".into()],
            previous: vec!["v1/content/b.txt".into()],
            next: vec!["v2/content/b.txt".into()],
        }
    }

    #[test]
    fn test_render_diff() {
        assert_eq!(
            render_diff(&diff()),
            "- v1/content/b.txt\n+ v2/content/b.txt\n"
        );
    }

    #[test]
    fn test_update_output_json_shape() {
        let output = UpdateOutput {
            success: true,
            result_code: 0,
            id: "obj".into(),
            status: UpdateStatus::DryRun,
            head: Some(VersionId::new(2).unwrap()),
            changes: Some(diff()),
        };
        let json: serde_json::Value = serde_json::to_value(&output).unwrap();
        assert_eq!(json["status"], "dry-run");
        assert_eq!(json["head"], "v2");
        assert_eq!(json["changes"]["next"][0], "v2/content/b.txt");
        assert!(output.render().starts_with("Would commit v2 of obj\n"));
    }

    #[test]
    fn test_verify_output_flattens_report() {
        let output = VerifyOutput {
            success: false,
            result_code: 2,
            id: "obj".into(),
            report: VerificationReport {
                is_valid: false,
                errors: vec!["missing".into()],
            },
        };
        let json: serde_json::Value = serde_json::to_value(&output).unwrap();
        assert_eq!(json["is_valid"], false);
        assert_eq!(json["errors"][0], "missing");
        assert_eq!(output.render(), "obj: 1 error(s)\n  missing\n");
    }

    #[test]
    fn test_ls_output_empty() {
        let output = LsOutput {
            success: true,
            result_code: 0,
            objects: vec![],
        };
        assert!(output.render(false).starts_with("No objects"));
    }
}
