//! WAV file utilities for the persistence worker
//!
//! Provides an appendable WAV sink built on the hound crate, a header
//! recovery scan for files left mid-write by a crash, and a PCM reader for
//! the full-audio transcription job.

use crate::domain::models::{BYTES_PER_FRAME, SAMPLE_RATE_HZ};
use crate::error::{AppError, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const WAV_HEADER_BYTES: u64 = 44;

fn wav_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE_HZ,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// An open, appendable WAV file owned by one persistence worker.
///
/// hound writes a placeholder header on create and rewrites the lengths on
/// `flush`/`finalize`, which is exactly the recovery story the rotation
/// protocol needs.
pub struct WavSink {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
    frames_written: u64,
}

impl WavSink {
    /// Create a new WAV file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = WavWriter::create(&path, wav_spec())
            .map_err(|e| AppError::PersistenceWrite(format!("Failed to create WAV file: {}", e)))?;
        Ok(Self {
            writer: Some(writer),
            path,
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Append one or more raw little-endian i16 PCM frames
    pub fn append_pcm(&mut self, pcm: &[u8]) -> Result<()> {
        if pcm.len() % 2 != 0 {
            return Err(AppError::InvalidInput(
                "PCM payload must be a whole number of 16-bit samples".to_string(),
            ));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| AppError::PersistenceWrite("WAV sink already closed".to_string()))?;
        for sample in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                .map_err(|e| AppError::PersistenceWrite(format!("Failed to write sample: {}", e)))?;
        }
        self.frames_written += (pcm.len() / BYTES_PER_FRAME) as u64;
        Ok(())
    }

    /// Flush buffered samples, rewrite the header lengths and fsync.
    /// This is the durability point acks wait on.
    pub fn sync(&mut self) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| AppError::PersistenceWrite("WAV sink already closed".to_string()))?;
        writer
            .flush()
            .map_err(|e| AppError::PersistenceWrite(format!("Failed to flush WAV file: {}", e)))?;
        // The writer owns its file handle, so fsync goes through a second one.
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    /// Move the open file (orphan re-link on rotation). The handle stays
    /// valid across the rename.
    pub fn rename<P: AsRef<Path>>(&mut self, new_path: P) -> Result<()> {
        let new_path = new_path.as_ref().to_path_buf();
        std::fs::rename(&self.path, &new_path)?;
        self.path = new_path;
        Ok(())
    }

    /// Finalize the header and close the file; returns the final path
    pub fn finalize(mut self) -> Result<PathBuf> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| {
                AppError::PersistenceWrite(format!("Failed to finalize WAV file: {}", e))
            })?;
        }
        File::open(&self.path)?.sync_all()?;
        Ok(self.path.clone())
    }
}

/// Rewrite the RIFF/data chunk lengths of one WAV file from its size on
/// disk. Returns true when the header needed fixing.
pub fn repair_wav_header<P: AsRef<Path>>(path: P) -> Result<bool> {
    let path = path.as_ref();
    let file_len = std::fs::metadata(path)?.len();
    if file_len < WAV_HEADER_BYTES {
        return Err(AppError::InvalidInput(format!(
            "{} is too short to be a WAV file",
            path.display()
        )));
    }

    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut header = [0u8; WAV_HEADER_BYTES as usize];
    file.read_exact(&mut header)?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return Err(AppError::InvalidInput(format!(
            "{} is not a RIFF/WAVE file",
            path.display()
        )));
    }

    let riff_len = (file_len - 8) as u32;
    let data_len = (file_len - WAV_HEADER_BYTES) as u32;
    let stored_riff = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let stored_data = u32::from_le_bytes([header[40], header[41], header[42], header[43]]);
    if stored_riff == riff_len && stored_data == data_len {
        return Ok(false);
    }

    file.seek(SeekFrom::Start(4))?;
    file.write_all(&riff_len.to_le_bytes())?;
    file.seek(SeekFrom::Start(40))?;
    file.write_all(&data_len.to_le_bytes())?;
    file.sync_all()?;
    Ok(true)
}

/// Scan a recordings directory and repair any WAV headers left inconsistent
/// by a crash mid-file. Idempotent; returns the number of files repaired.
pub fn repair_wav_headers<P: AsRef<Path>>(dir: P) -> Result<usize> {
    let mut repaired = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |ext| ext == "wav") {
            match repair_wav_header(&path) {
                Ok(true) => {
                    log::info!("Repaired WAV header of {}", path.display());
                    repaired += 1;
                }
                Ok(false) => {}
                Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
            }
        }
    }
    Ok(repaired)
}

/// Read the PCM payload of a WAV file back as little-endian i16 bytes
pub fn read_pcm<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let mut reader = hound::WavReader::open(path.as_ref())
        .map_err(|e| AppError::PersistenceWrite(format!("Failed to open WAV file: {}", e)))?;
    let mut pcm = Vec::with_capacity(reader.len() as usize * 2);
    for sample in reader.samples::<i16>() {
        let sample =
            sample.map_err(|e| AppError::PersistenceWrite(format!("Failed to read sample: {}", e)))?;
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    Ok(pcm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::BYTES_PER_FRAME;
    use tempfile::tempdir;

    #[test]
    fn test_append_sync_finalize() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut sink = WavSink::create(&path).unwrap();
        sink.append_pcm(&vec![1u8; BYTES_PER_FRAME]).unwrap();
        sink.append_pcm(&vec![2u8; BYTES_PER_FRAME]).unwrap();
        sink.sync().unwrap();
        assert_eq!(sink.frames_written(), 2);

        let final_path = sink.finalize().unwrap();
        assert_eq!(final_path, path);

        let pcm = read_pcm(&path).unwrap();
        assert_eq!(pcm.len(), 2 * BYTES_PER_FRAME);
        assert_eq!(pcm[0], 1);
        assert_eq!(pcm[BYTES_PER_FRAME], 2);
    }

    #[test]
    fn test_rejects_odd_payload() {
        let dir = tempdir().unwrap();
        let mut sink = WavSink::create(dir.path().join("odd.wav")).unwrap();
        assert!(sink.append_pcm(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_rename_keeps_writer_usable() {
        let dir = tempdir().unwrap();
        let orphan = dir.path().join("pending.wav");
        let linked = dir.path().join("linked.wav");

        let mut sink = WavSink::create(&orphan).unwrap();
        sink.append_pcm(&vec![1u8; BYTES_PER_FRAME]).unwrap();
        sink.rename(&linked).unwrap();
        sink.append_pcm(&vec![2u8; BYTES_PER_FRAME]).unwrap();
        let path = sink.finalize().unwrap();

        assert_eq!(path, linked);
        assert!(!orphan.exists());
        assert_eq!(read_pcm(&linked).unwrap().len(), 2 * BYTES_PER_FRAME);
    }

    #[test]
    fn test_repair_scan_fixes_truncated_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crashed.wav");

        let mut sink = WavSink::create(&path).unwrap();
        sink.append_pcm(&vec![3u8; BYTES_PER_FRAME]).unwrap();
        sink.finalize().unwrap();

        // Simulate a crash mid-file: header says zero-length data
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(4)).unwrap();
            file.write_all(&36u32.to_le_bytes()).unwrap();
            file.seek(SeekFrom::Start(40)).unwrap();
            file.write_all(&0u32.to_le_bytes()).unwrap();
        }
        assert!(read_pcm(&path).unwrap().is_empty());

        assert_eq!(repair_wav_headers(dir.path()).unwrap(), 1);
        assert_eq!(read_pcm(&path).unwrap().len(), BYTES_PER_FRAME);

        // Second scan is a no-op
        assert_eq!(repair_wav_headers(dir.path()).unwrap(), 0);
    }
}
