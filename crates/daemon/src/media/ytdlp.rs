use async_trait::async_trait;
use registry::{JobId, Kind};
use serde::Deserialize;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::cleanup::{remove_path, remove_with_prefix};
use super::options::{ExtractOptions, Invocation};
use super::progress::{parse_line, ProgressEvent};
use super::{
    artifact_extensions, Artifact, ExtractError, ExtractRequest, Extractor, MediaMetadata,
    ProgressSink,
};

/// Runs the `yt-dlp` executable. Artifacts land in `work_dir` as
/// `<job-id>.<ext>`.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
    work_dir: PathBuf,
    ffmpeg_location: Option<PathBuf>,
    cookies: Option<Arc<[u8]>>,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        YtDlp {
            binary: binary.into(),
            work_dir: work_dir.into(),
            ffmpeg_location: None,
            cookies: None,
        }
    }

    pub fn with_ffmpeg_location(mut self, dir: Option<PathBuf>) -> Self {
        self.ffmpeg_location = dir;
        self
    }

    pub fn with_cookies(mut self, cookies: Option<Vec<u8>>) -> Self {
        self.cookies = cookies.map(Arc::from);
        self
    }

    /// Write the cookie material to a file private to this call. The file is
    /// removed when the returned handle drops, whichever way the call ends.
    fn cookie_file(&self) -> Result<Option<NamedTempFile>, ExtractError> {
        let Some(cookies) = &self.cookies else {
            return Ok(None);
        };
        let mut file = tempfile::Builder::new()
            .prefix(".cookies-")
            .suffix(".txt")
            .tempfile_in(&self.work_dir)
            .map_err(ExtractError::Cookies)?;
        file.write_all(cookies).map_err(ExtractError::Cookies)?;
        file.flush().map_err(ExtractError::Cookies)?;
        Ok(Some(file))
    }

    fn command(&self, args: Vec<OsString>, url: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .arg("--")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run_download(
        &self,
        request: &ExtractRequest,
        progress: &ProgressSink,
    ) -> Result<Artifact, ExtractError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let cookies = self.cookie_file()?;

        let template = output_template(&self.work_dir, &request.job_id);
        let invocation = Invocation {
            ffmpeg_location: self.ffmpeg_location.as_deref(),
            cookies: cookies.as_ref().map(|f| f.path()),
            output_template: Some(template.as_os_str()),
        };
        let args = ExtractOptions::for_kind(request.kind).to_args(&invocation);

        let mut child = self
            .command(args, &request.url)
            .spawn()
            .map_err(ExtractError::Launch)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let read_progress = async {
            let Some(stdout) = stdout else {
                return Ok::<(), std::io::Error>(());
            };
            let mut lines = BufReader::new(stdout).lines();
            let mut processing = false;
            let mut last_pct = String::new();
            while let Some(line) = lines.next_line().await? {
                match parse_line(&line) {
                    Some(ProgressEvent::Downloading(pct)) if !processing && pct != last_pct => {
                        progress.downloading(pct.clone());
                        last_pct = pct;
                    }
                    Some(ProgressEvent::Processing) if !processing => {
                        processing = true;
                        progress.processing();
                    }
                    _ => {}
                }
            }
            Ok(())
        };

        let (read_result, stderr_text) = tokio::join!(read_progress, read_all(stderr));
        let status = child.wait().await?;
        read_result?;

        if !status.success() {
            return Err(classify_failure(&stderr_text, status));
        }

        let artifact = find_artifact(&self.work_dir, &request.job_id, request.kind).await?;
        if artifact.size == 0 {
            remove_path(&artifact.path).await;
            return Err(ExtractError::EmptyArtifact);
        }
        Ok(artifact)
    }
}

#[async_trait]
impl Extractor for YtDlp {
    async fn extract(
        &self,
        request: ExtractRequest,
        progress: ProgressSink,
    ) -> Result<Artifact, ExtractError> {
        let result = self.run_download(&request, &progress).await;
        let prefix = request.job_id.to_string();

        // Drop .part files, pre-merge streams and unconverted thumbnails.
        let keep = result.as_ref().ok().map(|a| a.path.as_path());
        remove_with_prefix(&self.work_dir, &prefix, keep).await;

        if let Err(e) = &result {
            warn!("yt-dlp failed for job {}: {}", request.job_id, e);
        }
        result
    }

    async fn metadata(&self, url: &str) -> Result<MediaMetadata, ExtractError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let cookies = self.cookie_file()?;
        let invocation = Invocation {
            ffmpeg_location: self.ffmpeg_location.as_deref(),
            cookies: cookies.as_ref().map(|f| f.path()),
            output_template: None,
        };
        let args = ExtractOptions::metadata_only().to_args(&invocation);

        let output = self
            .command(args, url)
            .output()
            .await
            .map_err(ExtractError::Launch)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, output.status));
        }
        parse_metadata(&output.stdout)
    }
}

fn output_template(work_dir: &Path, job_id: &JobId) -> OsString {
    work_dir.join(format!("{job_id}.%(ext)s")).into_os_string()
}

async fn read_all<R>(reader: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!("Failed to read yt-dlp stderr: {}", e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Locate `<job-id>.<ext>` for the first extension valid for `kind`.
pub async fn find_artifact(
    work_dir: &Path,
    job_id: &JobId,
    kind: Kind,
) -> Result<Artifact, ExtractError> {
    for ext in artifact_extensions(kind) {
        let path = work_dir.join(format!("{job_id}.{ext}"));
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                return Ok(Artifact {
                    path,
                    size: meta.len(),
                })
            }
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(ExtractError::ArtifactMissing { kind })
}

/// Map yt-dlp stderr to an error variant, keeping the most specific line.
pub fn classify_failure(stderr: &str, status: ExitStatus) -> ExtractError {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let message = lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|l| l.trim_start_matches("ERROR:").trim().to_string())
        .unwrap_or_else(|| format!("yt-dlp exited with {status}"));

    let lower = message.to_ascii_lowercase();
    if lower.contains("requested format is not available") {
        ExtractError::FormatUnavailable(message)
    } else if lower.contains("postprocessing") || lower.contains("ffmpeg") || lower.contains("ffprobe") {
        ExtractError::Postprocess(message)
    } else {
        ExtractError::Unreachable(message)
    }
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    title: Option<String>,
    thumbnail: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    like_count: Option<u64>,
    description: Option<String>,
}

pub fn parse_metadata(stdout: &[u8]) -> Result<MediaMetadata, ExtractError> {
    let raw: RawInfo = serde_json::from_slice(stdout)?;
    Ok(MediaMetadata {
        title: raw.title,
        thumbnail: raw.thumbnail,
        uploader: raw.uploader,
        duration: raw.duration,
        view_count: raw.view_count,
        like_count: raw.like_count,
        description: raw.description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn exit(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_failures() {
        let err = classify_failure(
            "WARNING: something\nERROR: [youtube] abc: Requested format is not available. Use --list-formats\n",
            exit(1),
        );
        assert!(matches!(err, ExtractError::FormatUnavailable(_)));

        let err = classify_failure(
            "ERROR: Postprocessing: ffprobe and ffmpeg not found\n",
            exit(1),
        );
        assert!(matches!(err, ExtractError::Postprocess(_)));

        let err = classify_failure(
            "ERROR: [youtube] abc: Video unavailable. This video is private\n",
            exit(1),
        );
        match err {
            ExtractError::Unreachable(msg) => {
                assert_eq!(msg, "[youtube] abc: Video unavailable. This video is private")
            }
            other => panic!("unexpected {other:?}"),
        }

        let err = classify_failure("", exit(2));
        assert!(matches!(err, ExtractError::Unreachable(msg) if msg.contains("exited")));
    }

    #[test]
    fn test_parse_metadata() {
        let json = br#"{
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg",
            "uploader": "Rick Astley",
            "duration": 213,
            "view_count": 1500000000,
            "like_count": null,
            "description": "The official video",
            "formats": []
        }"#;
        let meta = parse_metadata(json).unwrap();
        assert_eq!(meta.title.as_deref(), Some("Never Gonna Give You Up"));
        assert_eq!(meta.duration, Some(213.0));
        assert_eq!(meta.view_count, Some(1_500_000_000));
        assert_eq!(meta.like_count, None);
        assert_eq!(meta.uploader.as_deref(), Some("Rick Astley"));
    }

    #[test]
    fn test_parse_metadata_rejects_garbage() {
        assert!(matches!(
            parse_metadata(b"not json"),
            Err(ExtractError::InvalidOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_find_artifact_prefers_kind_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        let id = JobId::new();
        std::fs::write(tmp.path().join(format!("{id}.webp")), b"raw").unwrap();
        std::fs::write(tmp.path().join(format!("{id}.jpg")), b"jpeg").unwrap();

        let artifact = find_artifact(tmp.path(), &id, Kind::Thumbnail).await.unwrap();
        assert_eq!(artifact.path, tmp.path().join(format!("{id}.jpg")));
        assert_eq!(artifact.size, 4);

        let missing = find_artifact(tmp.path(), &id, Kind::Audio).await;
        assert!(matches!(
            missing,
            Err(ExtractError::ArtifactMissing { kind: Kind::Audio })
        ));
    }

    #[tokio::test]
    async fn test_cookie_file_is_scoped_to_call() {
        let tmp = tempfile::tempdir().unwrap();
        let ytdlp = YtDlp::new("yt-dlp", tmp.path()).with_cookies(Some(b"# cookies".to_vec()));

        let file = ytdlp.cookie_file().unwrap().unwrap();
        let path = file.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"# cookies");
        let other = ytdlp.cookie_file().unwrap().unwrap();
        assert_ne!(other.path(), path);

        drop(file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cookie_write_failure_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let ytdlp = YtDlp::new("yt-dlp", tmp.path().join("missing/dir"))
            .with_cookies(Some(b"# cookies".to_vec()));
        assert!(matches!(ytdlp.cookie_file(), Err(ExtractError::Cookies(_))));
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let tmp = tempfile::tempdir().unwrap();
        let ytdlp = YtDlp::new(tmp.path().join("no-such-yt-dlp"), tmp.path());
        let (sink, _rx) = ProgressSink::channel();
        let request = ExtractRequest {
            job_id: JobId::new(),
            url: "https://example.com/v".into(),
            kind: Kind::Video,
        };
        assert!(matches!(
            ytdlp.extract(request, sink).await,
            Err(ExtractError::Launch(_))
        ));
        assert!(matches!(
            ytdlp.metadata("https://example.com/v").await,
            Err(ExtractError::Launch(_))
        ));
    }

    /// Shell stand-in for yt-dlp. `$base` is the `-o` template without its
    /// `.%(ext)s` suffix, i.e. `<work-dir>/<job-id>`.
    #[cfg(unix)]
    const FAKE_PRELUDE: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
base=$(printf '%s' "$out" | sed 's/\.%(ext)s$//')
"#;

    #[cfg(unix)]
    fn fake_ytdlp(bin_dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let script = bin_dir.join("yt-dlp");
        std::fs::write(&script, [FAKE_PRELUDE, body, "\n"].concat()).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    fn files_for(dir: &Path, id: &JobId) -> Vec<String> {
        let prefix = id.to_string();
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(&prefix))
            .collect();
        names.sort();
        names
    }

    #[cfg(unix)]
    async fn run_fake(
        body: &str,
        kind: Kind,
    ) -> (
        Result<Artifact, ExtractError>,
        Vec<ProgressEvent>,
        JobId,
        tempfile::TempDir,
    ) {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let ytdlp = YtDlp::new(fake_ytdlp(bin.path(), body), work.path());
        let (sink, mut rx) = ProgressSink::channel();
        let job_id = JobId::new();
        let request = ExtractRequest {
            job_id,
            url: "https://example.com/v".into(),
            kind,
        };

        let result = ytdlp.extract(request, sink).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (result, events, job_id, work)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extract_forwards_progress_and_sweeps_leftovers() {
        let (result, events, id, work) = run_fake(
            r#"echo "[progress] 12.5%"
echo "[progress] 12.5%"
echo "[download] unrelated chatter"
echo "[progress] 80.0%"
printf 'part' > "$base.f137.mp4.part"
printf 'audio' > "$base.f140.m4a"
echo "[postprocess] Merger"
echo "[progress] 99.0%"
echo "[postprocess] FixupM3u8"
printf 'data' > "$base.mp4""#,
            Kind::Video,
        )
        .await;

        let artifact = result.unwrap();
        assert_eq!(artifact.path, work.path().join(format!("{id}.mp4")));
        assert_eq!(artifact.size, 4);
        assert_eq!(
            events,
            vec![
                ProgressEvent::Downloading("12.5%".into()),
                ProgressEvent::Downloading("80.0%".into()),
                ProgressEvent::Processing,
            ]
        );
        assert_eq!(files_for(work.path(), &id), vec![format!("{id}.mp4")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extract_deletes_empty_artifact() {
        let (result, _events, id, work) = run_fake(
            r#"echo "[progress] 100.0%"
: > "$base.mp3""#,
            Kind::Audio,
        )
        .await;

        assert!(matches!(result, Err(ExtractError::EmptyArtifact)));
        assert!(!work.path().join(format!("{id}.mp3")).exists());
        assert!(files_for(work.path(), &id).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_extract_leaves_no_files() {
        let (result, events, id, work) = run_fake(
            r#"echo "[progress] 3.0%"
printf 'part' > "$base.mp4.part"
printf 'raw' > "$base.webm"
echo "ERROR: [youtube] abc: Requested format is not available" >&2
exit 1"#,
            Kind::Video,
        )
        .await;

        assert!(matches!(result, Err(ExtractError::FormatUnavailable(_))));
        assert_eq!(events, vec![ProgressEvent::Downloading("3.0%".into())]);
        assert!(files_for(work.path(), &id).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sweep_keeps_other_jobs_files() {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let other = JobId::new();
        std::fs::write(work.path().join(format!("{other}.mp4")), b"keep").unwrap();

        let ytdlp = YtDlp::new(
            fake_ytdlp(bin.path(), r#"printf 'jpeg' > "$base.jpg""#),
            work.path(),
        );
        let (sink, _rx) = ProgressSink::channel();
        let request = ExtractRequest {
            job_id: JobId::new(),
            url: "https://example.com/v".into(),
            kind: Kind::Thumbnail,
        };
        ytdlp.extract(request, sink).await.unwrap();

        assert_eq!(files_for(work.path(), &other), vec![format!("{other}.mp4")]);
    }
}
