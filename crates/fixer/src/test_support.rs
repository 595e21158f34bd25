use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use crate::cancel::CancellationFlag;
use crate::error::{FixerError, Result};
use crate::tools::{ToolOutput, Transcoder};

/// Box arrangement of a generated file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// ftyp, moov, mdat
    MoovFirst,
    /// ftyp, mdat, moov
    MoovLast,
    /// ftyp, mdat, moov, free (the padding is dropped on remux)
    MoovLastPadded,
    /// Not a parseable box stream
    Corrupt,
}

const FTYP_PAYLOAD: usize = 16;
const MOOV_PAYLOAD: usize = 100;
const MDAT_PAYLOAD: usize = 10_000;
const FREE_PAYLOAD: usize = 1_000;

fn make_box(kind: &[u8; 4], payload_len: usize) -> Vec<u8> {
    let size = (payload_len + 8) as u32;
    let mut out = Vec::with_capacity(payload_len + 8);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(kind);
    // A running byte counter never spells out a box name.
    out.extend((0..payload_len).map(|i| (i % 251) as u8));
    out
}

pub fn mp4_bytes(layout: Layout) -> Vec<u8> {
    let ftyp = make_box(b"ftyp", FTYP_PAYLOAD);
    let moov = make_box(b"moov", MOOV_PAYLOAD);
    let mdat = make_box(b"mdat", MDAT_PAYLOAD);
    match layout {
        Layout::MoovFirst => [ftyp, moov, mdat].concat(),
        Layout::MoovLast => [ftyp, mdat, moov].concat(),
        Layout::MoovLastPadded => [ftyp, mdat, moov, make_box(b"free", FREE_PAYLOAD)].concat(),
        Layout::Corrupt => {
            let mut bytes = vec![0xFF, 0xFF, 0xFF, 0xF0];
            bytes.extend_from_slice(b"junk");
            bytes.extend(std::iter::repeat(0x5A).take(4_000));
            bytes
        }
    }
}

pub fn write_mp4(dir: &Path, name: &str, layout: Layout) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, mp4_bytes(layout)).unwrap();
    path
}

/// A top-level box: name, offset, size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopBox {
    pub kind: String,
    pub offset: u64,
    pub size: u64,
}

/// Top-level boxes, or `None` if the stream does not parse
pub fn parse_boxes(bytes: &[u8]) -> Option<Vec<TopBox>> {
    let mut boxes = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let header = bytes.get(offset..offset + 8)?;
        let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if size < 8 || offset + size > bytes.len() {
            return None;
        }
        boxes.push(TopBox {
            kind: String::from_utf8_lossy(&header[4..8]).into_owned(),
            offset: offset as u64,
            size: size as u64,
        });
        offset += size;
    }
    Some(boxes)
}

/// Rewrite with ftyp then moov first, dropping free space
fn relocate_moov(bytes: &[u8]) -> Option<Vec<u8>> {
    let boxes = parse_boxes(bytes)?;
    boxes.iter().find(|b| b.kind == "moov")?;

    let slice = |b: &TopBox| &bytes[b.offset as usize..(b.offset + b.size) as usize];
    let rank = |kind: &str| match kind {
        "ftyp" => 0,
        "moov" => 1,
        _ => 2,
    };
    let mut kept: Vec<&TopBox> = boxes.iter().filter(|b| b.kind != "free").collect();
    kept.sort_by_key(|b| rank(&b.kind));
    Some(kept.into_iter().flat_map(|b| slice(b).to_vec()).collect())
}

/// Prober-style trace for a file on disk
pub fn prober_trace(path: &Path) -> String {
    let bytes = std::fs::read(path).unwrap_or_default();
    match parse_boxes(&bytes) {
        Some(boxes) => boxes
            .iter()
            .map(|b| {
                format!(
                    "[mov,mp4,m4a,3gp,3g2,mj2 @ 0x5581c0] type:'{}' parent:'root' sz: {} {} {}\n",
                    b.kind,
                    b.size,
                    b.offset,
                    bytes.len()
                )
            })
            .collect(),
        None => format!(
            "[mov,mp4,m4a,3gp,3g2,mj2 @ 0x5581c0] moov atom not found\n{}: Invalid data found when processing input\n",
            path.display()
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemuxBehavior {
    /// Real relocation; unparseable input exits 1
    Relocate,
    /// Exit 1 with a long stderr, nothing written
    Fail,
    /// Exit 0 with a zero-byte output
    EmptyOutput,
    /// Exit 0 without creating the output
    NoOutput,
    /// Exit 0 with half of the input written
    Truncate,
    /// Write some bytes, then time out
    TimeoutAfterPartialWrite,
}

/// Transcoder double that reads and relocates top-level boxes of real files
pub struct FakeTranscoder {
    prober: bool,
    probe_override: Option<Option<String>>,
    transcoder_trace: String,
    encoder: String,
    remux: RemuxBehavior,
    fail_tools: bool,
    cancel_after_remux: Option<CancellationFlag>,
    remux_calls: AtomicUsize,
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self {
            prober: true,
            probe_override: None,
            transcoder_trace: "Input #0, mov,mp4,m4a,3gp,3g2,mj2\n  Duration: 00:00:01.00\n".to_string(),
            encoder: "Lavf61.1.100".to_string(),
            remux: RemuxBehavior::Relocate,
            fail_tools: false,
            cancel_after_remux: None,
            remux_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_probe_trace(mut self, trace: Option<String>) -> Self {
        self.probe_override = Some(trace);
        self
    }

    pub fn without_prober(mut self) -> Self {
        self.prober = false;
        self
    }

    pub fn with_transcoder_trace(mut self, trace: &str) -> Self {
        self.transcoder_trace = trace.to_string();
        self
    }

    pub fn with_encoder_tag(mut self, tag: &str) -> Self {
        self.encoder = tag.to_string();
        self
    }

    pub fn with_remux(mut self, behavior: RemuxBehavior) -> Self {
        self.remux = behavior;
        self
    }

    /// Every call fails as if the binary could not be started
    pub fn failing_tools(mut self) -> Self {
        self.fail_tools = true;
        self
    }

    /// Trip `flag` once the first remux has finished
    pub fn cancel_after_remux(mut self, flag: CancellationFlag) -> Self {
        self.cancel_after_remux = Some(flag);
        self
    }

    pub fn remux_calls(&self) -> usize {
        self.remux_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.fail_tools {
            return Err(FixerError::ToolSpawn {
                tool: "ffmpeg".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "fake tool missing"),
            });
        }
        Ok(())
    }

    fn do_remux(&self, input: &Path, output: &Path, timeout: Duration) -> Result<ToolOutput> {
        let ok = ToolOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        match self.remux {
            RemuxBehavior::Relocate => {
                let bytes = std::fs::read(input)?;
                match relocate_moov(&bytes) {
                    Some(fixed) => {
                        std::fs::write(output, fixed)?;
                        Ok(ok)
                    }
                    None => Ok(ToolOutput {
                        exit_code: Some(1),
                        stdout: String::new(),
                        stderr: format!(
                            "[mov,mp4,m4a,3gp,3g2,mj2 @ 0x5581c0] moov atom not found\n{}: Invalid data found when processing input\n",
                            input.display()
                        ),
                    }),
                }
            }
            RemuxBehavior::Fail => Ok(ToolOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "Conversion failed! ".repeat(100),
            }),
            RemuxBehavior::EmptyOutput => {
                std::fs::write(output, b"")?;
                Ok(ok)
            }
            RemuxBehavior::NoOutput => Ok(ok),
            RemuxBehavior::Truncate => {
                let bytes = std::fs::read(input)?;
                std::fs::write(output, &bytes[..bytes.len() / 2])?;
                Ok(ok)
            }
            RemuxBehavior::TimeoutAfterPartialWrite => {
                std::fs::write(output, [0u8; 100])?;
                Err(FixerError::ToolTimeout {
                    tool: "ffmpeg".to_string(),
                    secs: timeout.as_secs(),
                })
            }
        }
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe_trace(&self, input: &Path) -> Result<Option<String>> {
        self.check()?;
        if !self.prober {
            return Ok(None);
        }
        if let Some(trace) = &self.probe_override {
            return Ok(trace.clone());
        }
        Ok(Some(prober_trace(input)))
    }

    async fn encoder_tag(&self, _input: &Path) -> Result<Option<String>> {
        self.check()?;
        Ok(self.prober.then(|| self.encoder.clone()))
    }

    async fn transcoder_trace(&self, _input: &Path) -> Result<String> {
        self.check()?;
        Ok(self.transcoder_trace.clone())
    }

    async fn remux(&self, input: &Path, output: &Path, timeout: Duration) -> Result<ToolOutput> {
        self.check()?;
        let result = self.do_remux(input, output, timeout);
        self.remux_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(flag) = &self.cancel_after_remux {
            flag.cancel();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_layouts_parse() {
        let front = parse_boxes(&mp4_bytes(Layout::MoovFirst)).unwrap();
        let kinds: Vec<_> = front.iter().map(|b| b.kind.as_str()).collect();
        assert_eq!(kinds, vec!["ftyp", "moov", "mdat"]);

        assert!(parse_boxes(&mp4_bytes(Layout::Corrupt)).is_none());
    }

    #[test]
    fn test_relocation_moves_moov_forward() {
        let fixed = relocate_moov(&mp4_bytes(Layout::MoovLast)).unwrap();
        assert_eq!(fixed, mp4_bytes(Layout::MoovFirst));

        let unpadded = relocate_moov(&mp4_bytes(Layout::MoovLastPadded)).unwrap();
        assert_eq!(unpadded, mp4_bytes(Layout::MoovFirst));
    }
}
