use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use crate::config::FixerConfig;
use crate::error::Result;
use crate::events::EventLog;
use crate::remediate::size_delta_percent;
use crate::scan::{has_extension, FileTask};
use crate::tools::Transcoder;
use crate::trace::{first_mention_order, moov_records, MentionOrder};

/// Final answer for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionOutcome {
    AlreadyOptimized,
    NeedsRemediation,
}

impl DetectionOutcome {
    pub fn describe(&self) -> &'static str {
        match self {
            DetectionOutcome::AlreadyOptimized => "already optimized",
            DetectionOutcome::NeedsRemediation => "needs remediation",
        }
    }
}

/// Result of a single strategy. Strategies are pure functions over gathered
/// evidence; `Detector` does the gathering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Definite(DetectionOutcome),
    Inconclusive,
}

/// A verdict together with the evidence it was based on
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub verdict: Verdict,
    pub evidence: String,
}

impl Finding {
    fn needs(evidence: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Definite(DetectionOutcome::NeedsRemediation),
            evidence: evidence.into(),
        }
    }

    fn optimized(evidence: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Definite(DetectionOutcome::AlreadyOptimized),
            evidence: evidence.into(),
        }
    }

    fn inconclusive(evidence: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Inconclusive,
            evidence: evidence.into(),
        }
    }
}

/// Strategies in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    TraceOffsets,
    TailScan,
    AtomOrdering,
    TraceKeywords,
    EncoderTag,
    RemuxProbe,
    ExtensionDefault,
}

pub const CASCADE: [Strategy; 7] = [
    Strategy::TraceOffsets,
    Strategy::TailScan,
    Strategy::AtomOrdering,
    Strategy::TraceKeywords,
    Strategy::EncoderTag,
    Strategy::RemuxProbe,
    Strategy::ExtensionDefault,
];

impl Strategy {
    pub fn label(&self) -> &'static str {
        match self {
            Strategy::TraceOffsets => "prober trace offsets",
            Strategy::TailScan => "raw tail scan",
            Strategy::AtomOrdering => "atom ordering",
            Strategy::TraceKeywords => "transcoder trace keywords",
            Strategy::EncoderTag => "encoder tag",
            Strategy::RemuxProbe => "empirical remux probe",
            Strategy::ExtensionDefault => "conservative default",
        }
    }
}

/// Offset bands, in percent of file size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub leading: f64,
    pub trailing: f64,
}

impl From<&FixerConfig> for Thresholds {
    fn from(config: &FixerConfig) -> Self {
        Self {
            leading: config.leading_threshold_percent,
            trailing: config.trailing_threshold_percent,
        }
    }
}

/// Phrases meaning moov already precedes the media data
const OPTIMIZED_PHRASES: &[&str] = &[
    "moov atom is before mdat atom",
    "moov before mdat",
    "moov found at beginning",
    "moov at start",
    "faststart enabled",
    "moov placed at front",
];

/// Phrases meaning moov follows the media data
const NEEDS_PHRASES: &[&str] = &[
    "mdat atom is before moov atom",
    "moov after mdat",
    "moov found at end",
    "moov atom at the end",
    "moov atom is after mdat atom",
    "moov at end",
    "moov located after mdat",
    "moov comes after mdat",
    "moov last",
];

const MOOV_MARKER: &[u8; 4] = b"moov";

/// Judge a single offset against the bands
pub fn offset_verdict(offset_percent: f64, thresholds: Thresholds) -> Verdict {
    if offset_percent > thresholds.trailing {
        Verdict::Definite(DetectionOutcome::NeedsRemediation)
    } else if offset_percent < thresholds.leading {
        Verdict::Definite(DetectionOutcome::AlreadyOptimized)
    } else {
        Verdict::Inconclusive
    }
}

/// Step 1: moov offset records in a prober trace.
/// Records are judged in order; the first one outside the middle band decides.
pub fn trace_offsets(trace: &str, file_size: u64, thresholds: Thresholds) -> Finding {
    let records = moov_records(trace);
    if records.is_empty() {
        return Finding::inconclusive("no moov offset records in trace");
    }

    let mut middle = Vec::new();
    for record in &records {
        let Some(pct) = record.offset_percent(file_size) else {
            continue;
        };
        let evidence = format!(
            "moov at offset {} of {} bytes ({:.1}%)",
            record.offset,
            record.file_size.unwrap_or(file_size),
            pct
        );
        match offset_verdict(pct, thresholds) {
            Verdict::Definite(DetectionOutcome::NeedsRemediation) => return Finding::needs(evidence),
            Verdict::Definite(DetectionOutcome::AlreadyOptimized) => return Finding::optimized(evidence),
            Verdict::Inconclusive => middle.push(format!("{:.1}%", pct)),
        }
    }

    if middle.is_empty() {
        Finding::inconclusive(format!("{} moov records, none with a usable file size", records.len()))
    } else {
        Finding::inconclusive(format!("moov offsets in the middle band: {}", middle.join(", ")))
    }
}

/// Step 2: the moov marker anywhere in the tail bytes
pub fn tail_scan(tail: &[u8]) -> Finding {
    match tail.windows(MOOV_MARKER.len()).position(|w| w == MOOV_MARKER) {
        Some(pos) => Finding::needs(format!(
            "moov marker {} bytes before end of file",
            tail.len() - pos
        )),
        None => Finding::inconclusive(format!("no moov marker in last {} bytes", tail.len())),
    }
}

/// Step 3: first textual mention of mdat versus moov. Only meaningful when the
/// trace carried no offset records.
pub fn atom_ordering(trace: &str) -> Finding {
    if !moov_records(trace).is_empty() {
        return Finding::inconclusive("offset records present; ordering not used");
    }
    match first_mention_order(trace) {
        Some(MentionOrder::MdatFirst) => Finding::needs("mdat mentioned before moov"),
        Some(MentionOrder::MoovFirst) => Finding::inconclusive("moov mentioned before mdat"),
        None => Finding::inconclusive("trace does not mention both mdat and moov"),
    }
}

/// Step 4: known phrases in the transcoder's trace, optimized phrases first,
/// then the order in which the trace mentions mdat and moov
pub fn trace_keywords(trace: &str) -> Finding {
    let lower = trace.to_lowercase();
    if let Some(phrase) = OPTIMIZED_PHRASES.iter().find(|p| lower.contains(*p)) {
        return Finding::optimized(format!("trace says \"{}\"", phrase));
    }
    if let Some(phrase) = NEEDS_PHRASES.iter().find(|p| lower.contains(*p)) {
        return Finding::needs(format!("trace says \"{}\"", phrase));
    }
    match first_mention_order(&lower) {
        Some(MentionOrder::MdatFirst) => Finding::needs("no placement phrase; trace mentions mdat before moov"),
        _ => Finding::inconclusive("no placement phrase in trace"),
    }
}

/// Step 5: an encoder tag that records a faststart mux
pub fn encoder_tag(tag: &str) -> Finding {
    if tag.to_lowercase().contains("faststart") {
        Finding::optimized(format!("encoder tag \"{}\"", tag))
    } else {
        Finding::inconclusive(format!("encoder tag \"{}\" has no faststart marker", tag))
    }
}

/// Step 6: how much a throwaway remux changed the file size
pub fn size_delta(input_size: u64, probe_size: u64, threshold_percent: f64) -> Finding {
    let delta = size_delta_percent(input_size, probe_size);
    let evidence = format!(
        "throwaway remux {} -> {} bytes ({:.2}% change)",
        input_size, probe_size, delta
    );
    if delta > threshold_percent {
        Finding::needs(evidence)
    } else {
        Finding::inconclusive(evidence)
    }
}

/// Step 7: the target container is remuxed unless something proved otherwise
pub fn extension_default(path: &Path, target_extension: &str) -> Finding {
    if has_extension(path, target_extension) {
        Finding::needs(format!("no strategy decided; .{} defaults to remux", target_extension))
    } else {
        Finding::optimized("not a target container")
    }
}

/// Read at most `len` bytes from the end of a file
pub fn read_tail(path: &Path, len: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let start = size.saturating_sub(len);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((size - start) as usize);
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Evidence gathered so far for one file. The prober trace is shared by the
/// first three strategies and fetched at most once.
struct Evidence<'t> {
    task: &'t FileTask,
    probe_trace: Option<Option<String>>,
}

impl Evidence<'_> {
    fn trace(&self) -> Option<&str> {
        self.probe_trace.as_ref().and_then(|t| t.as_deref())
    }
}

/// Runs the cascade for one file at a time
pub struct Detector<'a, T: Transcoder + ?Sized> {
    transcoder: &'a T,
    config: &'a FixerConfig,
    log: &'a EventLog,
}

impl<'a, T: Transcoder + ?Sized> Detector<'a, T> {
    pub fn new(transcoder: &'a T, config: &'a FixerConfig, log: &'a EventLog) -> Self {
        Self {
            transcoder,
            config,
            log,
        }
    }

    /// Decide whether `task` needs remediation. Never fails: a strategy that
    /// errors is logged and skipped, and the cascade ends in a default.
    pub async fn detect(&self, task: &FileTask) -> DetectionOutcome {
        let name = task.display_name();
        let mut evidence = Evidence {
            task,
            probe_trace: None,
        };

        for strategy in CASCADE {
            let finding = match self.run(strategy, &mut evidence).await {
                Ok(finding) => finding,
                Err(e) => {
                    self.log
                        .debug(format!("{}: {} failed: {}", name, strategy.label(), e));
                    continue;
                }
            };
            self.log
                .debug(format!("{}: {}: {}", name, strategy.label(), finding.evidence));

            if let Verdict::Definite(outcome) = finding.verdict {
                self.log.info(format!(
                    "{}: {} ({})",
                    name,
                    outcome.describe(),
                    strategy.label()
                ));
                return outcome;
            }
        }

        self.log
            .info(format!("{}: {} (no strategy decided)", name, DetectionOutcome::NeedsRemediation.describe()));
        DetectionOutcome::NeedsRemediation
    }

    async fn run(&self, strategy: Strategy, evidence: &mut Evidence<'_>) -> Result<Finding> {
        let task = evidence.task;
        match strategy {
            Strategy::TraceOffsets => {
                self.fetch_probe_trace(evidence).await?;
                Ok(match evidence.trace() {
                    Some(trace) => trace_offsets(trace, task.size, Thresholds::from(self.config)),
                    None => Finding::inconclusive("prober unavailable"),
                })
            }
            Strategy::TailScan => match evidence.trace() {
                Some(trace) if trace.trim().is_empty() => {
                    let tail = read_tail(&task.path, self.config.tail_scan_bytes)?;
                    Ok(tail_scan(&tail))
                }
                Some(_) => Ok(Finding::inconclusive("prober produced output; tail not scanned")),
                None => Ok(Finding::inconclusive("prober did not run")),
            },
            Strategy::AtomOrdering => Ok(match evidence.trace() {
                Some(trace) => atom_ordering(trace),
                None => Finding::inconclusive("prober did not run"),
            }),
            Strategy::TraceKeywords => {
                let trace = self.transcoder.transcoder_trace(&task.path).await?;
                Ok(trace_keywords(&trace))
            }
            Strategy::EncoderTag => Ok(match self.transcoder.encoder_tag(&task.path).await? {
                Some(tag) => encoder_tag(&tag),
                None => Finding::inconclusive("prober unavailable"),
            }),
            Strategy::RemuxProbe => self.remux_probe(task).await,
            Strategy::ExtensionDefault => {
                Ok(extension_default(&task.path, &self.config.target_extension))
            }
        }
    }

    async fn fetch_probe_trace(&self, evidence: &mut Evidence<'_>) -> Result<()> {
        if evidence.probe_trace.is_some() {
            return Ok(());
        }
        match self.transcoder.probe_trace(&evidence.task.path).await {
            Ok(trace) => {
                evidence.probe_trace = Some(trace);
                Ok(())
            }
            Err(e) => {
                // Later strategies treat a failed probe like a missing prober.
                evidence.probe_trace = Some(None);
                Err(e)
            }
        }
    }

    async fn remux_probe(&self, task: &FileTask) -> Result<Finding> {
        let scratch = self.probe_path();
        let result = self
            .transcoder
            .remux(&task.path, &scratch, self.config.remux_timeout())
            .await;
        let probe_size = std::fs::metadata(&scratch).ok().map(|m| m.len());

        if probe_size.is_some() {
            if let Err(e) = std::fs::remove_file(&scratch) {
                self.log
                    .debug(format!("could not remove probe file {}: {}", scratch.display(), e));
            }
        }

        let output = result?;
        Ok(match probe_size {
            Some(size) => size_delta(task.size, size, self.config.probe_size_delta_percent),
            None => Finding::inconclusive(format!(
                "throwaway remux produced no file (exit code {:?})",
                output.exit_code
            )),
        })
    }

    fn probe_path(&self) -> PathBuf {
        self.config.scratch_dir().join(format!(
            "moovfix-probe-{}.{}",
            Uuid::new_v4(),
            self.config.target_extension.trim_start_matches('.')
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogLevel;
    use crate::test_support::{write_mp4, FakeTranscoder, Layout};
    use proptest::prelude::*;

    const BANDS: Thresholds = Thresholds {
        leading: 10.0,
        trailing: 90.0,
    };

    fn root_record(size: u64, offset: u64, total: u64) -> String {
        format!("[mov,mp4 @ 0x1] type:'moov' parent:'root' sz: {} {} {}\n", size, offset, total)
    }

    #[test]
    fn test_trailing_offset_needs_remediation() {
        let finding = trace_offsets(&root_record(100, 970, 1000), 0, BANDS);
        assert_eq!(finding.verdict, Verdict::Definite(DetectionOutcome::NeedsRemediation));
        assert!(finding.evidence.contains("97.0%"));
    }

    #[test]
    fn test_leading_offset_is_optimized() {
        let finding = trace_offsets(&root_record(100, 20, 1000), 0, BANDS);
        assert_eq!(finding.verdict, Verdict::Definite(DetectionOutcome::AlreadyOptimized));
    }

    #[test]
    fn test_middle_band_falls_through() {
        let finding = trace_offsets(&root_record(100, 500, 1000), 0, BANDS);
        assert_eq!(finding.verdict, Verdict::Inconclusive);
        assert!(finding.evidence.contains("50.0%"));
    }

    #[test]
    fn test_zero_size_record_is_skipped() {
        let trace = format!("{}{}", root_record(100, 50, 0), root_record(100, 950, 1000));
        let finding = trace_offsets(&trace, 0, BANDS);
        assert_eq!(finding.verdict, Verdict::Definite(DetectionOutcome::NeedsRemediation));
    }

    #[test]
    fn test_offset_only_record_uses_actual_size() {
        let finding = trace_offsets("moov at offset 9500", 10_000, BANDS);
        assert_eq!(finding.verdict, Verdict::Definite(DetectionOutcome::NeedsRemediation));

        let finding = trace_offsets("moov at offset 9500", 0, BANDS);
        assert_eq!(finding.verdict, Verdict::Inconclusive);
    }

    #[test]
    fn test_tail_scan() {
        let mut tail = vec![0u8; 64];
        assert_eq!(tail_scan(&tail).verdict, Verdict::Inconclusive);
        tail[40..44].copy_from_slice(b"moov");
        assert_eq!(tail_scan(&tail).verdict, Verdict::Definite(DetectionOutcome::NeedsRemediation));
    }

    #[test]
    fn test_atom_ordering_only_without_records() {
        assert_eq!(
            atom_ordering("parsing mdat ... then moov").verdict,
            Verdict::Definite(DetectionOutcome::NeedsRemediation)
        );
        assert_eq!(atom_ordering("moov first, mdat later").verdict, Verdict::Inconclusive);

        let with_record = format!("mdat {}", root_record(100, 500, 1000));
        assert_eq!(atom_ordering(&with_record).verdict, Verdict::Inconclusive);
    }

    #[test]
    fn test_keyword_precedence() {
        assert_eq!(
            trace_keywords("Note: MOOV BEFORE MDAT").verdict,
            Verdict::Definite(DetectionOutcome::AlreadyOptimized)
        );
        assert_eq!(
            trace_keywords("warning: moov atom at the end of file").verdict,
            Verdict::Definite(DetectionOutcome::NeedsRemediation)
        );
        // Both categories present: the optimized list is checked first.
        assert_eq!(
            trace_keywords("moov at end? no: moov at start").verdict,
            Verdict::Definite(DetectionOutcome::AlreadyOptimized)
        );
        assert_eq!(trace_keywords("nothing relevant").verdict, Verdict::Inconclusive);
    }

    #[test]
    fn test_keyword_step_falls_back_to_mention_order() {
        let finding = trace_keywords("[mov] type:'MDAT' parent:'root'\n[mov] type:'moov' parent:'root'");
        assert_eq!(finding.verdict, Verdict::Definite(DetectionOutcome::NeedsRemediation));
        assert!(finding.evidence.contains("mdat before moov"));

        assert_eq!(
            trace_keywords("[mov] type:'moov'\n[mov] type:'mdat'").verdict,
            Verdict::Inconclusive
        );
        // A phrase still wins over the ordering.
        assert_eq!(
            trace_keywords("mdat ... moov before mdat").verdict,
            Verdict::Definite(DetectionOutcome::AlreadyOptimized)
        );
    }

    #[test]
    fn test_encoder_tag_marker() {
        assert_eq!(
            encoder_tag("Lavf60 FastStart").verdict,
            Verdict::Definite(DetectionOutcome::AlreadyOptimized)
        );
        assert_eq!(encoder_tag("Lavf60.16.100").verdict, Verdict::Inconclusive);
    }

    #[test]
    fn test_size_delta_threshold() {
        assert_eq!(size_delta(1000, 1005, 1.0).verdict, Verdict::Inconclusive);
        assert_eq!(
            size_delta(1000, 1020, 1.0).verdict,
            Verdict::Definite(DetectionOutcome::NeedsRemediation)
        );
    }

    #[test]
    fn test_extension_default() {
        assert_eq!(
            extension_default(Path::new("a.MP4"), "mp4").verdict,
            Verdict::Definite(DetectionOutcome::NeedsRemediation)
        );
        assert_eq!(
            extension_default(Path::new("a.mov"), "mp4").verdict,
            Verdict::Definite(DetectionOutcome::AlreadyOptimized)
        );
    }

    #[test]
    fn test_read_tail_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.bin");
        std::fs::write(&path, b"abcdef").unwrap();
        assert_eq!(read_tail(&path, 4).unwrap(), b"cdef");
        assert_eq!(read_tail(&path, 100).unwrap(), b"abcdef");
    }

    fn task_for(path: PathBuf) -> FileTask {
        let size = std::fs::metadata(&path).unwrap().len();
        FileTask { path, size }
    }

    #[tokio::test]
    async fn test_detects_both_layouts_from_trace() {
        let dir = tempfile::tempdir().unwrap();
        let config = FixerConfig::default();
        let log = EventLog::new();
        let fake = FakeTranscoder::new();
        let detector = Detector::new(&fake, &config, &log);

        let front = write_mp4(dir.path(), "front.mp4", Layout::MoovFirst);
        let trailing = write_mp4(dir.path(), "trailing.mp4", Layout::MoovLast);

        assert_eq!(detector.detect(&task_for(front)).await, DetectionOutcome::AlreadyOptimized);
        assert_eq!(detector.detect(&task_for(trailing)).await, DetectionOutcome::NeedsRemediation);

        assert_eq!(log.count(LogLevel::Info), 2);
        assert_eq!(log.count(LogLevel::Error), 0);
        assert!(log.count(LogLevel::Debug) >= 2);
    }

    #[tokio::test]
    async fn test_empty_trace_triggers_tail_scan() {
        let dir = tempfile::tempdir().unwrap();
        let config = FixerConfig::default();
        let log = EventLog::new();
        let fake = FakeTranscoder::new().with_probe_trace(Some(String::new()));
        let detector = Detector::new(&fake, &config, &log);

        let trailing = write_mp4(dir.path(), "trailing.mp4", Layout::MoovLast);
        assert_eq!(detector.detect(&task_for(trailing)).await, DetectionOutcome::NeedsRemediation);
        assert!(log
            .entries()
            .iter()
            .any(|e| e.message.contains("raw tail scan") && e.level == LogLevel::Info));
    }

    #[tokio::test]
    async fn test_missing_prober_falls_back_to_keywords() {
        let dir = tempfile::tempdir().unwrap();
        let config = FixerConfig::default();
        let log = EventLog::new();
        let fake = FakeTranscoder::new()
            .without_prober()
            .with_transcoder_trace("[mov] moov atom is before mdat atom");
        let detector = Detector::new(&fake, &config, &log);

        let path = write_mp4(dir.path(), "clip.mp4", Layout::MoovLast);
        assert_eq!(detector.detect(&task_for(path)).await, DetectionOutcome::AlreadyOptimized);
    }

    #[tokio::test]
    async fn test_encoder_tag_decides_when_traces_are_silent() {
        let dir = tempfile::tempdir().unwrap();
        let config = FixerConfig::default();
        let log = EventLog::new();
        let fake = FakeTranscoder::new()
            .with_probe_trace(Some("Input #0, mov,mp4,m4a,3gp,3g2,mj2\n".to_string()))
            .with_encoder_tag("Lavf61.1.100 faststart");
        let detector = Detector::new(&fake, &config, &log);

        let path = write_mp4(dir.path(), "tagged.mp4", Layout::MoovLast);
        assert_eq!(detector.detect(&task_for(path)).await, DetectionOutcome::AlreadyOptimized);
        assert_eq!(fake.remux_calls(), 0);
    }

    #[tokio::test]
    async fn test_remux_probe_decides_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let config = FixerConfig {
            scratch_dir: Some(scratch.path().to_path_buf()),
            ..Default::default()
        };
        let log = EventLog::new();
        // Nothing upstream decides; the fake remux drops a trailing padding box.
        let fake = FakeTranscoder::new().without_prober();
        let detector = Detector::new(&fake, &config, &log);

        let path = write_mp4(dir.path(), "padded.mp4", Layout::MoovLastPadded);
        assert_eq!(detector.detect(&task_for(path)).await, DetectionOutcome::NeedsRemediation);
        assert!(log
            .entries()
            .iter()
            .any(|e| e.level == LogLevel::Info && e.message.contains("empirical remux probe")));
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_conservative_default_when_nothing_decides() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let config = FixerConfig {
            scratch_dir: Some(scratch.path().to_path_buf()),
            ..Default::default()
        };
        let log = EventLog::new();
        let fake = FakeTranscoder::new().without_prober();
        let detector = Detector::new(&fake, &config, &log);

        // moov already in front: the throwaway remux changes nothing.
        let path = write_mp4(dir.path(), "front.mp4", Layout::MoovFirst);
        assert_eq!(detector.detect(&task_for(path)).await, DetectionOutcome::NeedsRemediation);
        assert!(log
            .entries()
            .iter()
            .any(|e| e.message.contains("conservative default")));
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_strategy_errors_never_surface() {
        let dir = tempfile::tempdir().unwrap();
        let config = FixerConfig::default();
        let log = EventLog::new();
        let fake = FakeTranscoder::new().failing_tools();
        let detector = Detector::new(&fake, &config, &log);

        let path = write_mp4(dir.path(), "clip.mp4", Layout::MoovFirst);
        assert_eq!(detector.detect(&task_for(path)).await, DetectionOutcome::NeedsRemediation);
        assert_eq!(log.count(LogLevel::Error), 0);
        assert!(log.entries().iter().any(|e| e.message.contains("failed")));
    }

    proptest! {
        /// Anything past the trailing threshold always needs remediation
        #[test]
        fn test_trailing_band(pct in 90.0001f64..=100.0) {
            prop_assert_eq!(offset_verdict(pct, BANDS), Verdict::Definite(DetectionOutcome::NeedsRemediation));
        }

        /// Anything before the leading threshold is always optimized
        #[test]
        fn test_leading_band(pct in 0.0f64..9.9999) {
            prop_assert_eq!(offset_verdict(pct, BANDS), Verdict::Definite(DetectionOutcome::AlreadyOptimized));
        }

        /// The closed middle band never decides
        #[test]
        fn test_middle_band(pct in 10.0f64..=90.0) {
            prop_assert_eq!(offset_verdict(pct, BANDS), Verdict::Inconclusive);
        }
    }
}
