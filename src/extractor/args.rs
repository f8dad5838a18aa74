//! Argument vector construction for the extractor subprocess.
//!
//! Every flag here is mandatory and none can be influenced by user
//! input: the URL is passed as a single trailing argv element and no
//! shell is interposed.

use super::ExtractorConfig;

/// Format selector: best quality capped at 1080p, mp4 preferred, with
/// an audio merge fallback.
const FORMAT_SELECTOR: &str =
    "bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]/best[height<=1080][ext=mp4]/best";

/// Socket-level timeout handed to the tool, in seconds.
const SOCKET_TIMEOUT_SECS: u32 = 30;

/// Retries the tool performs internally. This is the only retry layer
/// in the system; jobs themselves are never retried.
const TOOL_RETRIES: u32 = 3;

/// Builds the full argument vector for one download run.
#[must_use]
pub fn build_args(config: &ExtractorConfig, url: &str, output_template: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::with_capacity(24);

    // Safety constraints.
    args.push("--no-playlist".to_string());
    args.push("--max-filesize".to_string());
    args.push(config.max_file_size.to_string());
    args.push("--match-filter".to_string());
    args.push(format!("duration<{}", config.max_duration_secs));

    // Output contract: one progress line per line, one JSON metadata
    // line, artifacts under the unique timestamped template.
    args.push("--newline".to_string());
    args.push("--print-json".to_string());
    args.push("-o".to_string());
    args.push(output_template.to_string());

    args.push("-f".to_string());
    args.push(FORMAT_SELECTOR.to_string());

    args.push("--embed-metadata".to_string());
    args.push("--embed-thumbnail".to_string());

    args.push("--socket-timeout".to_string());
    args.push(SOCKET_TIMEOUT_SECS.to_string());
    args.push("--retries".to_string());
    args.push(TOOL_RETRIES.to_string());

    args.push("--no-cache-dir".to_string());

    if let Some(ffmpeg) = &config.ffmpeg_path {
        args.push("--ffmpeg-location".to_string());
        args.push(ffmpeg.clone());
    }

    args.push(url.to_string());

    args
}
