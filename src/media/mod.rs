use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod probe;

pub use probe::{parse_probe_output, probe_source};

use crate::{PipelineError, Result};

/// Timescale used when converting seconds into `MediaTime`
pub const DEFAULT_TIMESCALE: u32 = 600;

/// Rational media time: `value / timescale` seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime { value: 0, timescale: DEFAULT_TIMESCALE };

    pub fn new(value: i64, timescale: u32) -> Self {
        Self {
            value,
            timescale: timescale.max(1),
        }
    }

    /// Convert seconds using the default timescale
    pub fn from_seconds(seconds: f64) -> Self {
        Self::from_seconds_with_timescale(seconds, DEFAULT_TIMESCALE)
    }

    pub fn from_seconds_with_timescale(seconds: f64, timescale: u32) -> Self {
        let timescale = timescale.max(1);
        Self {
            value: (seconds * timescale as f64).round() as i64,
            timescale,
        }
    }

    pub fn as_seconds(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    pub fn is_negative(&self) -> bool {
        self.value < 0
    }

    /// Express both operands on a shared timescale
    fn aligned(self, other: MediaTime) -> (i128, i128, u32) {
        if self.timescale == other.timescale {
            return (self.value as i128, other.value as i128, self.timescale);
        }

        let lcm = lcm(self.timescale as u64, other.timescale as u64);
        let timescale = if lcm <= u32::MAX as u64 {
            lcm as u32
        } else {
            self.timescale.max(other.timescale)
        };

        (
            rescale(self.value, self.timescale, timescale),
            rescale(other.value, other.timescale, timescale),
            timescale,
        )
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

fn rescale(value: i64, from: u32, to: u32) -> i128 {
    let scaled = value as i128 * to as i128;
    let from = from as i128;
    // Round half away from zero
    if scaled >= 0 {
        (scaled + from / 2) / from
    } else {
        (scaled - from / 2) / from
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.value as i128 * other.timescale as i128;
        let rhs = other.value as i128 * self.timescale as i128;
        lhs.cmp(&rhs)
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaTime) -> MediaTime {
        let (a, b, timescale) = self.aligned(rhs);
        MediaTime::new((a + b) as i64, timescale)
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: MediaTime) -> MediaTime {
        let (a, b, timescale) = self.aligned(rhs);
        MediaTime::new((a - b) as i64, timescale)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_seconds())
    }
}

/// Half-open interval `[start, end)` of a media timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    start: MediaTime,
    end: MediaTime,
}

impl TimeRange {
    pub fn new(start: MediaTime, end: MediaTime) -> Result<Self> {
        if start.is_negative() {
            return Err(PipelineError::Composition(format!(
                "time range starts before zero: {}",
                start
            )));
        }

        if start >= end {
            return Err(PipelineError::Composition(format!(
                "time range start {} is not before end {}",
                start, end
            )));
        }

        Ok(Self { start, end })
    }

    pub fn from_seconds(start: f64, end: f64) -> Result<Self> {
        if !start.is_finite() || !end.is_finite() {
            return Err(PipelineError::Composition(
                "time range bounds must be finite".to_string(),
            ));
        }

        Self::new(MediaTime::from_seconds(start), MediaTime::from_seconds(end))
    }

    pub fn start(&self) -> MediaTime {
        self.start
    }

    pub fn end(&self) -> MediaTime {
        self.end
    }

    pub fn duration(&self) -> MediaTime {
        self.end - self.start
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}-{:.3}", self.start.as_seconds(), self.end.as_seconds())
    }
}

/// Parses `START-END` in seconds, e.g. `2.3-17.0`
impl FromStr for TimeRange {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s.trim().split_once('-').ok_or_else(|| {
            PipelineError::Composition(format!("expected START-END in seconds, got '{}'", s))
        })?;

        let parse = |value: &str| {
            value.trim().parse::<f64>().map_err(|_| {
                PipelineError::Composition(format!("invalid seconds value '{}' in '{}'", value, s))
            })
        };

        Self::from_seconds(parse(start)?, parse(end)?)
    }
}

/// Kind of a stream inside a media container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    Video,
    Audio,
    Other,
}

/// One stream of a probed source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Absolute stream index inside the container
    pub index: u32,
    pub kind: TrackKind,
    pub codec: Option<String>,
    pub duration: Option<MediaTime>,
}

/// A probed source file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMedia {
    pub path: PathBuf,
    pub duration: MediaTime,
    pub tracks: Vec<Track>,
}

impl SourceMedia {
    pub fn primary_video(&self) -> Option<&Track> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Video)
    }

    pub fn primary_audio(&self) -> Option<&Track> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Audio)
    }
}

/// One concatenated piece of a composition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub video: TimeRange,
    pub audio: TimeRange,
    /// Position of this segment on the output timeline
    pub at: MediaTime,
}

impl Segment {
    pub fn duration(&self) -> MediaTime {
        self.video.duration()
    }
}

/// Ordered recipe of source ranges to concatenate into one output timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionPlan {
    pub source: PathBuf,
    pub video_track: u32,
    pub audio_track: u32,
    pub segments: Vec<Segment>,
}

impl CompositionPlan {
    /// Output timeline length, the sum of all segment durations
    pub fn duration(&self) -> MediaTime {
        self.segments
            .iter()
            .fold(MediaTime::ZERO, |acc, seg| acc + seg.duration())
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Build a plan that places `ranges` of the source's primary video and audio
/// tracks back to back, in list order.
///
/// An empty `ranges` list produces an empty plan; exporting it is rejected.
pub fn compose(source: &SourceMedia, ranges: &[TimeRange]) -> Result<CompositionPlan> {
    let video = source.primary_video().ok_or_else(|| {
        PipelineError::InvalidAsset(format!("{} has no video track", source.path.display()))
    })?;
    let audio = source.primary_audio().ok_or_else(|| {
        PipelineError::InvalidAsset(format!("{} has no audio track", source.path.display()))
    })?;

    let mut segments = Vec::with_capacity(ranges.len());
    let mut cursor = MediaTime::ZERO;

    for (i, range) in ranges.iter().enumerate() {
        if range.end() > source.duration {
            return Err(PipelineError::Composition(format!(
                "range #{} ({}) exceeds source duration {}",
                i + 1,
                range,
                source.duration
            )));
        }

        segments.push(Segment {
            video: *range,
            audio: *range,
            at: cursor,
        });
        cursor = cursor + range.duration();
    }

    tracing::debug!(
        "Composed {} segment(s) from {} into {}",
        segments.len(),
        source.path.display(),
        cursor
    );

    Ok(CompositionPlan {
        source: source.path.clone(),
        video_track: video.index,
        audio_track: audio.index,
        segments,
    })
}
