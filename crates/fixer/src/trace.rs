use std::sync::OnceLock;
use regex::Regex;

/// Position of the moov atom as reported by one trace record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoovRecord {
    pub offset: u64,
    pub size: Option<u64>,
    /// Present only when the record itself carries the file size
    pub file_size: Option<u64>,
}

impl MoovRecord {
    /// Offset as a percentage of the file size, `None` when the size is zero
    pub fn offset_percent(&self, actual_file_size: u64) -> Option<f64> {
        let total = self.file_size.unwrap_or(actual_file_size);
        if total == 0 {
            return None;
        }
        Some(self.offset as f64 / total as f64 * 100.0)
    }
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    SizeOffsetTotal,
    OffsetSize,
    SizeOffset,
    OffsetOnly,
}

const RECORD_PATTERNS: &[(Layout, &str)] = &[
    // [mov,mp4,m4a,3gp,3g2,mj2 @ 0x...] type:'moov' parent:'root' sz: 18822 41660193 41679007
    (Layout::SizeOffsetTotal, r"type:'moov' parent:'root' sz: (\d+) (\d+) (\d+)"),
    (Layout::SizeOffsetTotal, r"type:\s*'moov'\s+parent:\s*'root'\s+sz:\s+(\d+)\s+(\d+)\s+(\d+)"),
    (Layout::OffsetSize, r"moov\s+\(offset: (\d+), size: (\d+)\)"),
    (Layout::OffsetOnly, r"moov\s+atom\s+at\s+position\s+(\d+)"),
    (Layout::OffsetOnly, r"moov\s+at\s+offset\s+(\d+)"),
    // Size comes first in this wording. Earlier moov fixers read the first
    // number of every two-number layout as the offset, which is wrong here.
    (Layout::SizeOffset, r"moov\s+size\s+(\d+)\s+offset\s+(\d+)"),
];

fn patterns() -> &'static [(Layout, Regex)] {
    static COMPILED: OnceLock<Vec<(Layout, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RECORD_PATTERNS
            .iter()
            .filter_map(|(layout, pattern)| Regex::new(pattern).ok().map(|re| (*layout, re)))
            .collect()
    })
}

/// Every moov record in `trace`, grouped by layout in the order layouts are tried.
/// Trace wording varies between ffmpeg releases, hence several layouts.
pub fn moov_records(trace: &str) -> Vec<MoovRecord> {
    let mut records = Vec::new();
    for (layout, re) in patterns() {
        for caps in re.captures_iter(trace) {
            let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
            let record = match layout {
                Layout::SizeOffsetTotal => num(2).map(|offset| MoovRecord {
                    offset,
                    size: num(1),
                    file_size: num(3),
                }),
                Layout::OffsetSize => num(1).map(|offset| MoovRecord {
                    offset,
                    size: num(2),
                    file_size: None,
                }),
                Layout::SizeOffset => num(2).map(|offset| MoovRecord {
                    offset,
                    size: num(1),
                    file_size: None,
                }),
                Layout::OffsetOnly => num(1).map(|offset| MoovRecord {
                    offset,
                    size: None,
                    file_size: None,
                }),
            };
            // Digits too long for u64 are not a usable record.
            if let Some(record) = record {
                records.push(record);
            }
        }
    }
    records
}

/// Relative order of the first mdat and first moov mention in a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionOrder {
    MdatFirst,
    MoovFirst,
}

pub fn first_mention_order(trace: &str) -> Option<MentionOrder> {
    let mdat = trace.find("mdat")?;
    let moov = trace.find("moov")?;
    Some(if mdat < moov {
        MentionOrder::MdatFirst
    } else {
        MentionOrder::MoovFirst
    })
}
