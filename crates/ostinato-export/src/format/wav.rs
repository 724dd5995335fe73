//! WAV encoding via hound, with RIFF INFO metadata.

use crate::error::{ExportError, Result};
use crate::options::{BitDepth, ExportMetadata, ExportOptions};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Write a processed stereo (or downmixed mono) pair as WAV.
pub fn write_wav(
    path: &Path,
    left: &[f32],
    right: &[f32],
    sample_rate: u32,
    options: &ExportOptions,
) -> Result<()> {
    if left.len() != right.len() {
        return Err(ExportError::InvalidData(
            "left and right channels have different lengths".into(),
        ));
    }

    let spec = WavSpec {
        channels: if options.mono { 1 } else { 2 },
        sample_rate,
        bits_per_sample: options.bit_depth.bits(),
        sample_format: match options.bit_depth {
            BitDepth::Float32 => SampleFormat::Float,
            _ => SampleFormat::Int,
        },
    };

    let mut writer =
        WavWriter::create(path, spec).map_err(|e| ExportError::Encoding(e.to_string()))?;
    if options.mono {
        for i in 0..left.len() {
            write_sample(&mut writer, (left[i] + right[i]) * 0.5, options.bit_depth)?;
        }
    } else {
        for i in 0..left.len() {
            write_sample(&mut writer, left[i], options.bit_depth)?;
            write_sample(&mut writer, right[i], options.bit_depth)?;
        }
    }
    writer
        .finalize()
        .map_err(|e| ExportError::Encoding(e.to_string()))?;

    if !options.metadata.is_empty() {
        append_info_chunk(path, &options.metadata)?;
    }
    Ok(())
}

fn write_sample<W: Write + Seek>(
    writer: &mut WavWriter<W>,
    sample: f32,
    bit_depth: BitDepth,
) -> Result<()> {
    let result = match bit_depth {
        BitDepth::Int16 => writer.write_sample(float_to_i16(sample)),
        BitDepth::Int24 => writer.write_sample(float_to_i24(sample)),
        BitDepth::Float32 => writer.write_sample(sample),
    };
    result.map_err(|e| ExportError::Encoding(e.to_string()))
}

#[inline]
fn float_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

#[inline]
fn float_to_i24(sample: f32) -> i32 {
    (sample.clamp(-1.0, 1.0) * 8_388_607.0) as i32
}

/// Append a `LIST`/`INFO` chunk carrying title/artist/genre and patch the
/// RIFF size. Metadata values pass through unmodified.
fn append_info_chunk(path: &Path, metadata: &ExportMetadata) -> Result<()> {
    let mut chunk: Vec<u8> = Vec::new();
    chunk.extend_from_slice(b"INFO");
    push_info_entry(&mut chunk, b"INAM", &metadata.title);
    push_info_entry(&mut chunk, b"IART", &metadata.artist);
    push_info_entry(&mut chunk, b"IGNR", &metadata.genre);

    let mut file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
    file.seek(SeekFrom::End(0))?;
    file.write_all(b"LIST")?;
    file.write_all(&(chunk.len() as u32).to_le_bytes())?;
    file.write_all(&chunk)?;

    // RIFF size = file length minus the 8-byte RIFF header
    let total = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(4))?;
    file.write_all(&((total - 8) as u32).to_le_bytes())?;
    Ok(())
}

fn push_info_entry(chunk: &mut Vec<u8>, id: &[u8; 4], value: &str) {
    if value.is_empty() {
        return;
    }
    let mut data = value.as_bytes().to_vec();
    data.push(0); // null terminator
    chunk.extend_from_slice(id);
    chunk.extend_from_slice(&(data.len() as u32).to_le_bytes());
    chunk.extend_from_slice(&data);
    if data.len() % 2 == 1 {
        chunk.push(0); // word alignment pad
    }
}

/// Read back the INFO entries of a WAV file (used by tests and round-trip
/// verification).
pub fn read_info_chunk(path: &Path) -> Result<ExportMetadata> {
    let mut bytes = Vec::new();
    std::fs::File::open(path)?.read_to_end(&mut bytes)?;

    let mut metadata = ExportMetadata::default();
    let mut pos = 12; // past RIFF header
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let body = pos + 8;
        if id == b"LIST" && bytes.get(body..body + 4) == Some(&b"INFO"[..]) {
            let mut p = body + 4;
            let end = (body + size).min(bytes.len());
            while p + 8 <= end {
                let sub_id: [u8; 4] = bytes[p..p + 4].try_into().unwrap();
                let sub_size =
                    u32::from_le_bytes(bytes[p + 4..p + 8].try_into().unwrap()) as usize;
                let data = &bytes[p + 8..(p + 8 + sub_size).min(end)];
                let text = String::from_utf8_lossy(data)
                    .trim_end_matches('\0')
                    .to_string();
                match &sub_id {
                    b"INAM" => metadata.title = text,
                    b"IART" => metadata.artist = text,
                    b"IGNR" => metadata.genre = text,
                    _ => {}
                }
                p += 8 + sub_size + (sub_size % 2);
            }
        }
        pos = body + size + (size % 2);
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_conversion() {
        assert_eq!(float_to_i16(0.0), 0);
        assert_eq!(float_to_i16(1.0), 32767);
        assert_eq!(float_to_i16(-2.0), -32767);
        assert_eq!(float_to_i24(1.0), 8_388_607);
    }

    #[test]
    fn test_write_and_reread_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.wav");
        let samples = vec![0.1f32; 256];
        let options = ExportOptions {
            metadata: ExportMetadata {
                title: "Étude".into(),
                artist: "someone".into(),
                genre: "ambient".into(),
            },
            ..Default::default()
        };

        write_wav(&path, &samples, &samples, 48000, &options).unwrap();

        // Still a readable WAV after the INFO chunk was appended
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 48000);

        let metadata = read_info_chunk(&path).unwrap();
        assert_eq!(metadata.title, "Étude");
        assert_eq!(metadata.artist, "someone");
        assert_eq!(metadata.genre, "ambient");
    }

    #[test]
    fn test_mono_downmix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let left = vec![1.0f32; 16];
        let right = vec![0.0f32; 16];
        let options = ExportOptions {
            mono: true,
            bit_depth: BitDepth::Float32,
            dither: crate::options::DitherType::None,
            ..Default::default()
        };

        write_wav(&path, &left, &right, 48000, &options).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        let first: f32 = reader.samples::<f32>().next().unwrap().unwrap();
        assert!((first - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.wav");
        let result = write_wav(&path, &[0.0; 4], &[0.0; 3], 48000, &ExportOptions::default());
        assert!(result.is_err());
    }
}
