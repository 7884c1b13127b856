use tokio::sync::mpsc;

/// Marker prefixes printed through yt-dlp's `--progress-template`.
pub const DOWNLOAD_MARKER: &str = "[progress]";
pub const POSTPROCESS_MARKER: &str = "[postprocess]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Percentage string such as `"42.3%"`.
    Downloading(String),
    /// Download is over; merge/transcode/embed has started.
    Processing,
}

/// Sending half of a job's progress channel. Dropping it tells the runner
/// that no more events are coming.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ProgressSink { tx }, rx)
    }

    pub fn downloading(&self, percent: impl Into<String>) {
        self.report(ProgressEvent::Downloading(percent.into()));
    }

    pub fn processing(&self) {
        self.report(ProgressEvent::Processing);
    }

    pub fn report(&self, event: ProgressEvent) {
        // The runner may already have given up on the job.
        let _ = self.tx.send(event);
    }
}

/// Parse one line of yt-dlp stdout produced with our progress templates.
pub fn parse_line(line: &str) -> Option<ProgressEvent> {
    let line = strip_ansi(line);
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(DOWNLOAD_MARKER) {
        let pct = rest.trim();
        let number = pct.strip_suffix('%')?.trim();
        number.parse::<f64>().ok()?;
        return Some(ProgressEvent::Downloading(format!("{number}%")));
    }
    if line.starts_with(POSTPROCESS_MARKER) {
        return Some(ProgressEvent::Processing);
    }
    None
}

fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            // CSI sequences end with an ASCII letter.
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download_line() {
        assert_eq!(
            parse_line("[progress]  42.3%"),
            Some(ProgressEvent::Downloading("42.3%".to_string()))
        );
        assert_eq!(
            parse_line("[progress] 100.0%\n"),
            Some(ProgressEvent::Downloading("100.0%".to_string()))
        );
    }

    #[test]
    fn test_parse_colored_percent() {
        assert_eq!(
            parse_line("[progress] \u{1b}[0;94m  7.1%\u{1b}[0m"),
            Some(ProgressEvent::Downloading("7.1%".to_string()))
        );
    }

    #[test]
    fn test_unknown_percent_is_skipped() {
        assert_eq!(parse_line("[progress] Unknown %"), None);
        assert_eq!(parse_line("[progress] N/A"), None);
    }

    #[test]
    fn test_parse_postprocess_line() {
        assert_eq!(
            parse_line("[postprocess] Merger"),
            Some(ProgressEvent::Processing)
        );
        assert_eq!(
            parse_line("[postprocess] ExtractAudio"),
            Some(ProgressEvent::Processing)
        );
    }

    #[test]
    fn test_other_output_ignored() {
        assert_eq!(parse_line("[youtube] abc: Downloading webpage"), None);
        assert_eq!(parse_line(""), None);
    }

    #[tokio::test]
    async fn test_sink_closes_channel_on_drop() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.downloading("10%");
        sink.processing();
        drop(sink);
        assert_eq!(
            rx.recv().await,
            Some(ProgressEvent::Downloading("10%".into()))
        );
        assert_eq!(rx.recv().await, Some(ProgressEvent::Processing));
        assert_eq!(rx.recv().await, None);
    }
}
