//! Line-oriented parsing of the extractor's stdout.
//!
//! The tool interleaves three kinds of lines we care about: a single
//! structured metadata JSON object, `[download]` progress lines, and
//! destination announcements from the downloader and its post-processors.
//! Later destination matches overwrite earlier ones, so the final file
//! reported by a merger/move step wins over the raw download path.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::job::VideoInfo;

// Patterns are compile-time constants; construction cannot fail.
#[allow(clippy::unwrap_used)]
static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\]\s+(\d+\.?\d*)%").unwrap());

#[allow(clippy::unwrap_used)]
static DESTINATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\] Destination: (.+)").unwrap());

#[allow(clippy::unwrap_used)]
static ALREADY_DOWNLOADED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\] (.+) has already been downloaded").unwrap());

#[allow(clippy::unwrap_used)]
static MERGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[Merger\] Merging formats into "(.+)""#).unwrap());

#[allow(clippy::unwrap_used)]
static FFMPEG_DESTINATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[ffmpeg\] Destination: (.+)").unwrap());

#[allow(clippy::unwrap_used)]
static MOVE_FILES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[MoveFiles\] Moving file "(.+)" to "(.+)""#).unwrap());

/// Accumulated state from scanning stdout.
#[derive(Debug, Default)]
pub struct OutputScan {
    /// Parsed structured metadata line, when one was seen.
    pub info: Option<VideoInfo>,
    /// Best-known artifact path. Post-processing lines overwrite
    /// download-phase lines.
    pub destination: Option<PathBuf>,
    /// The duration match-filter skipped the media.
    pub filter_skipped: bool,
    /// The filesize cap aborted the download.
    pub size_skipped: bool,
}

impl OutputScan {
    /// Creates an empty scan state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one stdout line through the parsers.
    ///
    /// Invokes `on_progress` with the truncated integer percent for each
    /// progress line.
    pub fn observe_line(&mut self, line: &str, on_progress: &mut dyn FnMut(u8)) {
        // The metadata line is the only JSON object the tool prints.
        if line.starts_with('{') {
            if let Ok(info) = serde_json::from_str::<VideoInfo>(line) {
                self.info = Some(info);
            }
            return;
        }

        if let Some(captures) = PROGRESS_RE.captures(line) {
            if let Ok(percent) = captures[1].parse::<f64>() {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                on_progress(percent.clamp(0.0, 100.0) as u8);
            }
        }

        if let Some(captures) = DESTINATION_RE.captures(line) {
            self.destination = Some(PathBuf::from(captures[1].trim()));
        }

        if let Some(captures) = ALREADY_DOWNLOADED_RE.captures(line) {
            self.destination = Some(PathBuf::from(captures[1].trim()));
        }

        if let Some(captures) = MERGER_RE.captures(line) {
            self.destination = Some(PathBuf::from(captures[1].trim()));
        }

        if let Some(captures) = FFMPEG_DESTINATION_RE.captures(line) {
            self.destination = Some(PathBuf::from(captures[1].trim()));
        }

        // Destination of the move, not the source.
        if let Some(captures) = MOVE_FILES_RE.captures(line) {
            self.destination = Some(PathBuf::from(captures[2].trim()));
        }

        if line.contains("does not pass filter") {
            self.filter_skipped = true;
        }

        if line.contains("larger than max-filesize") {
            self.size_skipped = true;
        }
    }
}
