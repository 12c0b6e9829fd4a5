//! Fuzzy reconciliation of completion reports to `sync_pending` jobs.
//!
//! The sync agent reports what it copied by cleaned name only. Resolution
//! tries, in order: the info hash when the agent still has it, a unique
//! case-insensitive exact title match, then normalized substring containment
//! ranked by specificity and recency.

use std::cmp::Reverse;
use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::job::{AcquisitionJob, JobStatus};

/// Trailing file counter added by the agent for multi-file transfers,
/// e.g. "Severance S02 (9 files)" or "Severance S02 (9 файлов)".
static FILE_COUNT_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*\(\s*\d+\s+(files?|файл(ов|а)?)\s*\)\s*$").expect("valid regex")
});

static MEDIA_EXTENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(mkv|mp4|avi|m4v|mov|wmv|mpg|mpeg|ts|m2ts|webm|flac|mp3|m4a|srt)$")
        .expect("valid regex")
});

/// Release tokens that say nothing about which title it is.
static NOISE_TOKENS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "480p", "576p", "720p", "1080p", "1080i", "2160p", "4k", "uhd", "hdr", "hdr10", "dv",
        "sdr", "x264", "x265", "h264", "h265", "hevc", "avc", "xvid", "divx", "av1", "10bit",
        "8bit", "aac", "ac3", "eac3", "dts", "ddp", "ddp5", "dd5", "atmos", "truehd", "web",
        "dl", "webdl", "webrip", "bluray", "bdrip", "brrip", "bdremux", "remux", "hdrip",
        "dvdrip", "hdtv", "proper", "repack", "rip",
    ]
    .into_iter()
    .collect()
});

/// What the agent sent, after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReport {
    pub filename: String,
    pub local_path: String,
    /// Info hash, when the agent still knows it.
    pub torrent_hash: Option<String>,
}

impl CompletionReport {
    pub fn new(filename: impl Into<String>, local_path: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            local_path: local_path.into(),
            torrent_hash: None,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.torrent_hash = Some(hash.into());
        self
    }

    /// Name with the agent's file counter removed.
    pub fn cleaned_name(&self) -> String {
        strip_file_count(&self.filename)
    }
}

/// How a report was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    CorrelationKey,
    Exact,
    Containment,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::CorrelationKey => "key",
            MatchKind::Exact => "exact",
            MatchKind::Containment => "containment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub job_id: String,
    pub kind: MatchKind,
}

pub fn strip_file_count(name: &str) -> String {
    FILE_COUNT_SUFFIX.replace(name.trim(), "").trim().to_string()
}

/// Normalized comparison form of a title or file name.
pub fn normalize_title(name: &str) -> String {
    let name = strip_file_count(name);
    let name = MEDIA_EXTENSION.replace(&name, "");
    let lowered = name.to_lowercase();

    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty() && !NOISE_TOKENS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

fn contains_either_way(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

/// Pick the job a report belongs to among `candidates`.
///
/// Only `sync_pending` candidates are considered; anything else passed in is
/// ignored so a report can never touch an unrelated job.
pub fn resolve(report: &CompletionReport, candidates: &[AcquisitionJob]) -> Option<Resolution> {
    let pending: Vec<&AcquisitionJob> = candidates
        .iter()
        .filter(|job| job.status == JobStatus::SyncPending)
        .collect();

    if let Some(hash) = report.torrent_hash.as_deref().map(str::to_lowercase) {
        if let Some(job) = pending
            .iter()
            .find(|job| job.correlation_key.as_deref() == Some(hash.as_str()))
        {
            return Some(Resolution {
                job_id: job.id.clone(),
                kind: MatchKind::CorrelationKey,
            });
        }
    }

    let cleaned = report.cleaned_name();
    let exact: Vec<&&AcquisitionJob> = pending
        .iter()
        .filter(|job| job.display_name.trim().to_lowercase() == cleaned.to_lowercase())
        .collect();
    if let [job] = exact.as_slice() {
        return Some(Resolution {
            job_id: job.id.clone(),
            kind: MatchKind::Exact,
        });
    }

    let reported = normalize_title(&cleaned);
    if reported.is_empty() {
        return None;
    }

    pending
        .iter()
        .filter_map(|job| {
            let title = normalize_title(&job.display_name);
            (!title.is_empty() && contains_either_way(&reported, &title))
                .then_some((title.chars().count(), job))
        })
        .max_by_key(|(specificity, job)| (*specificity, job.status_updated_at, Reverse(job.id.clone())))
        .map(|(_, job)| Resolution {
            job_id: job.id.clone(),
            kind: MatchKind::Containment,
        })
}
