//! Human-readable catalog of known provider issues and their workarounds.

use crate::domain_types::{ProviderName, Severity};
use crate::error::{ErrorClass, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, instrument};

const TITLE: &str = "# Provider Quirks Catalog";
const FORMAT_SECTION: &str = "\
## Format

Each entry documents a known provider issue and the workaround routing
should apply for it. Entries are separated by a line containing only `---`.
";

/// A documented provider issue and its workaround.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quirk {
    /// The provider this quirk applies to.
    pub provider: ProviderName,
    /// Human-readable description of the issue.
    pub issue: String,
    /// How to work around the issue.
    pub workaround: String,
    /// When the issue was first discovered.
    pub discovered: chrono::NaiveDate,
    /// Free-form description of how often the issue occurs.
    pub frequency: String,
    /// How severe the issue is.
    pub severity: Severity,
}

/// Errors from the quirks store.
#[derive(Debug, thiserror::Error)]
pub enum QuirksStoreError {
    /// A filesystem fault.
    #[error("quirks catalog I/O error: {0}")]
    Io(String),
    /// Provider, issue, or workaround text was empty.
    #[error("quirk fields must be non-empty")]
    Validation,
}

impl ErrorClass for QuirksStoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::Validation => ErrorKind::Validation,
        }
    }
}

type StoreResult<T> = Result<T, QuirksStoreError>;

/// Markdown-backed catalog of provider quirks.
pub struct QuirksStore {
    path: PathBuf,
    quirks: RwLock<Vec<Quirk>>,
}

impl QuirksStore {
    /// Loads the catalog at `path`, tolerating a missing file (treated as empty).
    ///
    /// # Errors
    ///
    /// Returns an error on a filesystem fault other than a missing file.
    #[instrument(skip_all)]
    pub async fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let quirks = match tokio::fs::read_to_string(&path).await {
            Ok(text) => parse_catalog(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(QuirksStoreError::Io(e.to_string())),
        };
        info!(count = quirks.len(), path = %path.display(), "loaded provider quirks catalog");
        Ok(Self { path, quirks: RwLock::new(quirks) })
    }

    /// Adds `quirk`. An identical `(provider, issue)` pair with unchanged
    /// severity and frequency is a no-op; a changed pair is updated in
    /// place; a new pair is appended. Always rewrites the whole file.
    ///
    /// # Errors
    ///
    /// Returns [`QuirksStoreError::Validation`] if any text field is empty,
    /// or `Io` on a filesystem fault.
    #[instrument(skip(self, quirk), fields(provider = %quirk.provider, issue = %quirk.issue))]
    pub async fn add_quirk(&self, quirk: Quirk) -> StoreResult<()> {
        if quirk.issue.trim().is_empty() || quirk.workaround.trim().is_empty() {
            return Err(QuirksStoreError::Validation);
        }

        let mut quirks = self.quirks.write().await;
        if let Some(existing) = quirks.iter_mut().find(|q| q.provider == quirk.provider && q.issue == quirk.issue) {
            if existing.severity == quirk.severity && existing.frequency == quirk.frequency {
                return Ok(());
            }
            existing.severity = quirk.severity;
            existing.frequency.clone_from(&quirk.frequency);
            existing.workaround.clone_from(&quirk.workaround);
            existing.discovered = quirk.discovered;
        } else {
            quirks.push(quirk);
        }

        self.write_file(&quirks).await
    }

    async fn write_file(&self, quirks: &[Quirk]) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| QuirksStoreError::Io(e.to_string()))?;
        }
        let rendered = render_catalog(quirks);
        tokio::fs::write(&self.path, rendered).await.map_err(|e| QuirksStoreError::Io(e.to_string()))
    }

    /// Returns all quirks for `provider`.
    pub async fn get_provider_quirks(&self, provider: &ProviderName) -> Vec<Quirk> {
        self.quirks.read().await.iter().filter(|q| &q.provider == provider).cloned().collect()
    }

    /// Returns every quirk in the catalog.
    pub async fn get_all_quirks(&self) -> Vec<Quirk> {
        self.quirks.read().await.clone()
    }

    /// Returns all quirks at exactly `severity`.
    pub async fn get_quirks_by_severity(&self, severity: Severity) -> Vec<Quirk> {
        self.quirks.read().await.iter().filter(|q| q.severity == severity).cloned().collect()
    }

    /// Returns all quirks whose frequency text case-insensitively contains `substring`.
    pub async fn get_quirks_by_frequency(&self, substring: &str) -> Vec<Quirk> {
        let needle = substring.to_ascii_lowercase();
        self.quirks
            .read()
            .await
            .iter()
            .filter(|q| q.frequency.to_ascii_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    /// Returns the workaround for the stored quirk whose issue text
    /// case-insensitively substring-matches `issue` (in either direction),
    /// or `None` if there is no match.
    pub async fn apply_workaround(&self, provider: &ProviderName, issue: &str) -> Option<String> {
        let needle = issue.to_ascii_lowercase();
        self.quirks
            .read()
            .await
            .iter()
            .filter(|q| &q.provider == provider)
            .find(|q| {
                let stored = q.issue.to_ascii_lowercase();
                stored.contains(&needle) || needle.contains(&stored)
            })
            .map(|q| q.workaround.clone())
    }
}

fn parse_catalog(text: &str) -> Vec<Quirk> {
    let mut quirks = Vec::new();
    let mut current_provider: Option<String> = None;
    let mut issue = None;
    let mut workaround = None;
    let mut discovered = None;
    let mut frequency = None;
    let mut severity = None;

    let flush = |provider: &Option<String>,
                 issue: &mut Option<String>,
                 workaround: &mut Option<String>,
                 discovered: &mut Option<chrono::NaiveDate>,
                 frequency: &mut Option<String>,
                 severity: &mut Option<Severity>,
                 out: &mut Vec<Quirk>| {
        if let (Some(provider), Some(issue_v), Some(workaround_v), Some(discovered_v), Some(frequency_v), Some(severity_v)) =
            (provider, issue.take(), workaround.take(), discovered.take(), frequency.take(), severity.take())
            && let Ok(provider) = ProviderName::try_new(provider.clone())
        {
            out.push(Quirk { provider, issue: issue_v, workaround: workaround_v, discovered: discovered_v, frequency: frequency_v, severity: severity_v });
        }
    };

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line == "---" {
            flush(&current_provider, &mut issue, &mut workaround, &mut discovered, &mut frequency, &mut severity, &mut quirks);
            current_provider = None;
            continue;
        }
        if let Some(rest) = line.strip_prefix("### ") {
            flush(&current_provider, &mut issue, &mut workaround, &mut discovered, &mut frequency, &mut severity, &mut quirks);
            current_provider = Some(rest.trim().to_string());
            continue;
        }
        if let Some(value) = bullet_value(line, "Issue") {
            issue = Some(value);
        } else if let Some(value) = bullet_value(line, "Workaround") {
            workaround = Some(value);
        } else if let Some(value) = bullet_value(line, "Discovered") {
            discovered = chrono::NaiveDate::parse_from_str(&value, "%Y-%m-%d").ok();
        } else if let Some(value) = bullet_value(line, "Frequency") {
            frequency = Some(value);
        } else if let Some(value) = bullet_value(line, "Severity") {
            severity = value.parse().ok();
        }
    }
    flush(&current_provider, &mut issue, &mut workaround, &mut discovered, &mut frequency, &mut severity, &mut quirks);
    quirks
}

fn bullet_value(line: &str, label: &str) -> Option<String> {
    let prefix = format!("- **{label}**:");
    line.strip_prefix(&prefix).map(|rest| rest.trim().to_string())
}

fn render_catalog(quirks: &[Quirk]) -> String {
    let mut out = String::new();
    out.push_str(TITLE);
    out.push_str("\n\n");
    out.push_str(FORMAT_SECTION);
    out.push('\n');

    for (i, q) in quirks.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n\n");
        }
        let _ = writeln!(out, "### {}", q.provider);
        let _ = writeln!(out, "- **Issue**: {}", q.issue);
        let _ = writeln!(out, "- **Workaround**: {}", q.workaround);
        let _ = writeln!(out, "- **Discovered**: {}", q.discovered.format("%Y-%m-%d"));
        let _ = writeln!(out, "- **Frequency**: {}", q.frequency);
        let _ = writeln!(out, "- **Severity**: {}\n", q.severity);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(provider: &str, issue: &str, severity: Severity, frequency: &str) -> Quirk {
        Quirk {
            provider: ProviderName::try_new(provider.to_string()).unwrap(),
            issue: issue.to_string(),
            workaround: "retry with lower temperature".to_string(),
            discovered: chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            frequency: frequency.to_string(),
            severity,
        }
    }

    #[tokio::test]
    async fn add_then_get_round_trips_through_the_markdown_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provider-quirks.md");
        let store = QuirksStore::load(&path).await.unwrap();
        store.add_quirk(sample("ollama", "truncates long context", Severity::Medium, "occasional")).await.unwrap();

        let reloaded = QuirksStore::load(&path).await.unwrap();
        let provider = ProviderName::try_new("ollama".to_string()).unwrap();
        let found = reloaded.get_provider_quirks(&provider).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].issue, "truncates long context");
    }

    #[tokio::test]
    async fn re_adding_same_pair_with_new_severity_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provider-quirks.md");
        let store = QuirksStore::load(&path).await.unwrap();
        store.add_quirk(sample("ollama", "slow cold start", Severity::Low, "rare")).await.unwrap();
        store.add_quirk(sample("ollama", "slow cold start", Severity::High, "frequent")).await.unwrap();

        let all = store.get_all_quirks().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].severity, Severity::High);
        assert_eq!(all[0].frequency, "frequent");
    }

    #[tokio::test]
    async fn exact_duplicate_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provider-quirks.md");
        let store = QuirksStore::load(&path).await.unwrap();
        let q = sample("ollama", "slow cold start", Severity::Low, "rare");
        store.add_quirk(q.clone()).await.unwrap();
        store.add_quirk(q).await.unwrap();
        assert_eq!(store.get_all_quirks().await.len(), 1);
    }

    #[tokio::test]
    async fn apply_workaround_matches_case_insensitive_substring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provider-quirks.md");
        let store = QuirksStore::load(&path).await.unwrap();
        store.add_quirk(sample("ollama", "Truncates Long Context", Severity::Medium, "occasional")).await.unwrap();

        let provider = ProviderName::try_new("ollama".to_string()).unwrap();
        let found = store.apply_workaround(&provider, "long context").await;
        assert_eq!(found.as_deref(), Some("retry with lower temperature"));
    }

    #[tokio::test]
    async fn missing_file_loads_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let store = QuirksStore::load(dir.path().join("nope.md")).await.unwrap();
        assert!(store.get_all_quirks().await.is_empty());
    }

    #[test]
    fn parser_tolerates_the_format_section_template_text() {
        let text = format!("{TITLE}\n\n{FORMAT_SECTION}\n### ollama\n- **Issue**: x\n- **Workaround**: y\n- **Discovered**: 2026-01-01\n- **Frequency**: rare\n- **Severity**: low\n");
        let quirks = parse_catalog(&text);
        assert_eq!(quirks.len(), 1);
    }
}
