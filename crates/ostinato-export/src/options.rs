//! Export options and metadata.

use crate::dsp::ResampleQuality;

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    #[default]
    Wav,
    Flac,
}

impl AudioFormat {
    /// File extension (without dot).
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
        }
    }
}

/// Output sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitDepth {
    Int16,
    #[default]
    Int24,
    Float32,
}

impl BitDepth {
    pub fn bits(&self) -> u16 {
        match self {
            BitDepth::Int16 => 16,
            BitDepth::Int24 => 24,
            BitDepth::Float32 => 32,
        }
    }
}

/// Dither applied when reducing bit depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DitherType {
    None,
    Rectangular,
    #[default]
    Triangular,
}

/// Metadata embedded in the output file, passed through unmodified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportMetadata {
    pub title: String,
    pub artist: String,
    pub genre: String,
}

impl ExportMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.artist.is_empty() && self.genre.is_empty()
    }
}

/// Export options.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: AudioFormat,
    pub bit_depth: BitDepth,
    /// Target sample rate (None = engine rate).
    pub sample_rate: Option<u32>,
    pub dither: DitherType,
    pub resample_quality: ResampleQuality,
    /// Downmix to mono.
    pub mono: bool,
    /// Blocks rendered and discarded before the range, so smoothers and
    /// plugin tails settle identically on every render of the same state.
    pub preroll_blocks: usize,
    pub metadata: ExportMetadata,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: AudioFormat::Wav,
            bit_depth: BitDepth::Int24,
            sample_rate: None,
            dither: DitherType::Triangular,
            resample_quality: ResampleQuality::Medium,
            mono: false,
            preroll_blocks: 8,
            metadata: ExportMetadata::default(),
        }
    }
}

impl ExportOptions {
    pub fn output_sample_rate(&self, engine_rate: u32) -> u32 {
        self.sample_rate.unwrap_or(engine_rate)
    }

    pub fn needs_resampling(&self, engine_rate: u32) -> bool {
        self.sample_rate.map(|r| r != engine_rate).unwrap_or(false)
    }
}
