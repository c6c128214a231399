use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use core_model::{RunReport, TranscriptSink, deterministic_id};
use serde::{Deserialize, Serialize};

// One UTF-8 artifact per conversation under an export root, plus a manifest
// and the final run report. Writes are verified by read-back checksum
// before being recorded.
pub struct FsTranscriptStore {
    root: PathBuf,
    entries: BTreeMap<String, TranscriptEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub title: String,
    pub file: String,
    pub bytes: usize,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub generated_at: DateTime<Utc>,
    pub transcripts: Vec<TranscriptEntry>,
}

impl FsTranscriptStore {
    pub fn create(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create export root {}", root.display()))?;
        Ok(FsTranscriptStore {
            root,
            entries: BTreeMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_name(title: &str) -> String {
        format!("{}-{}.txt", slug(title), &deterministic_id(&[title])[..8])
    }

    // Writes manifest.json and report.json next to the transcripts and
    // returns the report path.
    pub fn finish(&self, report: &RunReport) -> anyhow::Result<PathBuf> {
        let manifest = ExportManifest {
            generated_at: Utc::now(),
            transcripts: self.entries.values().cloned().collect(),
        };
        fs::write(
            self.root.join("manifest.json"),
            serde_json::to_vec_pretty(&manifest)?,
        )?;
        let report_path = self.root.join("report.json");
        fs::write(&report_path, serde_json::to_vec_pretty(report)?)?;
        Ok(report_path)
    }
}

impl TranscriptSink for FsTranscriptStore {
    fn persist(&mut self, title: &str, transcript: &str) -> anyhow::Result<()> {
        let name = Self::artifact_name(title);
        let path = self.root.join(&name);
        fs::write(&path, transcript)
            .with_context(|| format!("write transcript {}", path.display()))?;

        let reloaded = fs::read(&path).with_context(|| "verify transcript write")?;
        let checksum = blake3::hash(&reloaded).to_hex().to_string();
        if checksum != blake3::hash(transcript.as_bytes()).to_hex().to_string() {
            anyhow::bail!("transcript verification failed for {}", path.display());
        }

        self.entries.insert(
            name.clone(),
            TranscriptEntry {
                title: title.to_string(),
                file: name,
                bytes: transcript.len(),
                checksum,
            },
        );
        Ok(())
    }
}

// Collisions are handled by the hash suffix in `artifact_name`, not here.
fn slug(title: &str) -> String {
    let mut out = String::new();
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
        if out.len() >= 64 {
            break;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("untitled");
    }
    out
}
