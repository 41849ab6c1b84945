use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::SampleSource;
use crate::error::{LocationFault, RecordingError, SensorFault};
use crate::types::{Location, Reading};

/// A recorded session: either a bare array of readings or an object with a
/// `readings` field (the shape the device's session logger writes).
#[derive(Deserialize)]
#[serde(untagged)]
enum Recording {
    Bare(Vec<Reading>),
    Session { readings: Vec<Reading> },
}

/// Plays back a recorded session one reading per call. The end of the
/// recording is reported as `SensorFault::Exhausted`.
pub struct ReplaySource {
    readings: Vec<Reading>,
    cursor: usize,
    last_fix: Option<Location>,
}

impl ReplaySource {
    pub fn new(readings: Vec<Reading>) -> Self {
        Self { readings, cursor: 0, last_fix: None }
    }

    /// Loads `.json` or gzip-compressed `.json.gz`.
    pub fn load(path: &Path) -> Result<Self, RecordingError> {
        let file = File::open(path).map_err(|source| RecordingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let recording: Recording = if path.extension().map(|e| e == "gz").unwrap_or(false) {
            serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
        } else {
            serde_json::from_reader(BufReader::new(file))?
        };
        let readings = match recording {
            Recording::Bare(readings) | Recording::Session { readings } => readings,
        };
        Ok(Self::new(readings))
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.readings.len() - self.cursor
    }
}

impl SampleSource for ReplaySource {
    async fn read(&mut self) -> Result<Reading, SensorFault> {
        let reading = self.readings.get(self.cursor).cloned().ok_or(SensorFault::Exhausted)?;
        self.cursor += 1;
        if let Some(fix) = reading.fix {
            self.last_fix = Some(fix);
        }
        Ok(reading)
    }

    /// Answers with the most recent recorded fix; the recording has no
    /// notion of a live request.
    async fn read_location(&mut self) -> Result<Location, LocationFault> {
        self.last_fix.ok_or(LocationFault::NoFix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const SESSION: &str = r#"{"readings": [
        {"sample": {"timestamp": 0.00, "ax": 0.0, "ay": 0.0, "az": 1.0, "gx": 0.0, "gy": 0.0, "gz": 0.0}},
        {"sample": {"timestamp": 0.02, "ax": 0.1, "ay": 0.0, "az": 1.0, "gx": 0.0, "gy": 0.0, "gz": 0.0},
         "fix": {"lat": 51.5, "lon": -0.12, "fix_valid": true, "age_secs": 0.4}}
    ]}"#;

    #[tokio::test]
    async fn test_plays_back_in_order_then_exhausts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, SESSION).unwrap();

        let mut source = ReplaySource::load(&path).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.read_location().await, Err(LocationFault::NoFix));

        assert_eq!(source.read().await.unwrap().sample.timestamp, 0.0);
        let second = source.read().await.unwrap();
        assert_eq!(second.sample.ax, 0.1);
        assert_eq!(source.read_location().await.unwrap().lat, 51.5);
        assert_eq!(source.read().await.unwrap_err(), SensorFault::Exhausted);
        assert_eq!(source.remaining(), 0);
    }

    #[tokio::test]
    async fn test_gzipped_bare_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder
            .write_all(br#"[{"sample": {"timestamp": 1.0, "ax": 0.0, "ay": 0.0, "az": 1.0, "gx": 0.0, "gy": 0.0, "gz": 0.0}}]"#)
            .unwrap();
        encoder.finish().unwrap();

        let mut source = ReplaySource::load(&path).unwrap();
        assert_eq!(source.read().await.unwrap().sample.timestamp, 1.0);
    }

    #[test]
    fn test_missing_file() {
        let err = ReplaySource::load(Path::new("/nonexistent/session.json")).err().unwrap();
        assert!(matches!(err, RecordingError::Io { .. }));
    }
}
