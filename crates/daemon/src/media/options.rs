use registry::Kind;
use std::ffi::OsString;
use std::path::Path;

use super::progress::{DOWNLOAD_MARKER, POSTPROCESS_MARKER};

pub const AUDIO_CODEC: &str = "mp3";
pub const AUDIO_BITRATE: &str = "192K";
pub const MERGE_FORMAT: &str = "mp4";
pub const THUMBNAIL_FORMAT: &str = "jpg";

const RETRIES: u32 = 5;
const FRAGMENT_RETRIES: u32 = 10;
const SOCKET_TIMEOUT_SECS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTranscode {
    pub codec: &'static str,
    pub bitrate: &'static str,
}

/// yt-dlp knobs for one kind of request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    pub format: Option<&'static str>,
    pub merge_output_format: Option<&'static str>,
    pub skip_download: bool,
    pub write_thumbnail: bool,
    pub convert_thumbnails: Option<&'static str>,
    pub extract_audio: Option<AudioTranscode>,
    pub embed_thumbnail: bool,
    pub embed_metadata: bool,
    pub dump_json: bool,
}

impl ExtractOptions {
    pub fn for_kind(kind: Kind) -> Self {
        match kind {
            Kind::Video => ExtractOptions {
                format: Some("bestvideo+bestaudio/best"),
                merge_output_format: Some(MERGE_FORMAT),
                ..Default::default()
            },
            Kind::Audio => ExtractOptions {
                format: Some("bestaudio/best"),
                extract_audio: Some(AudioTranscode {
                    codec: AUDIO_CODEC,
                    bitrate: AUDIO_BITRATE,
                }),
                embed_thumbnail: true,
                embed_metadata: true,
                ..Default::default()
            },
            Kind::Thumbnail => ExtractOptions {
                skip_download: true,
                write_thumbnail: true,
                convert_thumbnails: Some(THUMBNAIL_FORMAT),
                ..Default::default()
            },
        }
    }

    pub fn metadata_only() -> Self {
        ExtractOptions {
            skip_download: true,
            dump_json: true,
            ..Default::default()
        }
    }

    /// Flags for this request, without the binary name or the URL.
    pub fn to_args(&self, invocation: &Invocation<'_>) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        let mut push = |flag: &str| args.push(flag.into());

        push("--no-playlist");
        push("--no-warnings");
        push("--retries");
        push(&RETRIES.to_string());
        push("--fragment-retries");
        push(&FRAGMENT_RETRIES.to_string());
        push("--socket-timeout");
        push(&SOCKET_TIMEOUT_SECS.to_string());
        push("--skip-unavailable-fragments");

        if self.dump_json {
            push("--dump-single-json");
        } else {
            push("--quiet");
            push("--progress");
            push("--newline");
            push("--progress-template");
            push(&format!("download:{DOWNLOAD_MARKER} %(progress._percent_str)s"));
            push("--progress-template");
            push(&format!(
                "postprocess:{POSTPROCESS_MARKER} %(progress.postprocessor)s"
            ));
        }

        if self.skip_download {
            push("--skip-download");
        }
        if let Some(format) = self.format {
            push("-f");
            push(format);
        }
        if let Some(container) = self.merge_output_format {
            push("--merge-output-format");
            push(container);
        }
        if let Some(audio) = &self.extract_audio {
            push("--extract-audio");
            push("--audio-format");
            push(audio.codec);
            push("--audio-quality");
            push(audio.bitrate);
        }
        if self.write_thumbnail {
            push("--write-thumbnail");
        }
        if let Some(format) = self.convert_thumbnails {
            push("--convert-thumbnails");
            push(format);
        }
        if self.embed_thumbnail {
            push("--embed-thumbnail");
        }
        if self.embed_metadata {
            push("--embed-metadata");
        }

        if let Some(dir) = invocation.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(dir.as_os_str().to_owned());
        }
        if let Some(cookies) = invocation.cookies {
            args.push("--cookies".into());
            args.push(cookies.as_os_str().to_owned());
        }
        if let Some(template) = invocation.output_template {
            args.push("-o".into());
            args.push(template.to_owned());
        }

        args
    }
}

/// Per-call paths that sit next to the kind-derived options.
#[derive(Debug, Default, Clone, Copy)]
pub struct Invocation<'a> {
    pub ffmpeg_location: Option<&'a Path>,
    pub cookies: Option<&'a Path>,
    pub output_template: Option<&'a std::ffi::OsStr>,
}
