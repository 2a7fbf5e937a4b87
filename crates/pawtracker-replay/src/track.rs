//! Recorded tracks.
//!
//! A track file is plain text with one `latitude,longitude` pair per line.
//! Blank lines and lines starting with `#` are ignored.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Errors that can occur while loading a track.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The track file could not be read.
    #[error("failed to read track {path}: {source}")]
    Read {
        /// Path to the track file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A line could not be parsed as a position.
    #[error("invalid track line {line}: {message}")]
    Parse {
        /// One-based line number.
        line: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// The track has no positions.
    #[error("track contains no positions")]
    Empty,
}

/// Result type for track operations.
pub type Result<T> = std::result::Result<T, TrackError>;

/// An ordered, non-empty list of positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    points: Vec<(f64, f64)>,
}

impl Track {
    /// Build a track from `(latitude, longitude)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is empty or a position is out of range.
    pub fn from_points(points: Vec<(f64, f64)>) -> Result<Self> {
        if points.is_empty() {
            return Err(TrackError::Empty);
        }
        for (index, (lat, lon)) in points.iter().enumerate() {
            check_position(*lat, *lon).map_err(|message| TrackError::Parse {
                line: index + 1,
                message,
            })?;
        }
        Ok(Self { points })
    }

    /// Parse a track from its text form.
    ///
    /// # Errors
    ///
    /// Returns an error if a line is malformed or the track is empty.
    pub fn parse(text: &str) -> Result<Self> {
        let mut points = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parse_err = |message: String| TrackError::Parse {
                line: index + 1,
                message,
            };

            let (lat, lon) = line
                .split_once(',')
                .ok_or_else(|| parse_err(format!("expected 'latitude,longitude', got '{line}'")))?;
            let lat: f64 = lat
                .trim()
                .parse()
                .map_err(|_| parse_err(format!("invalid latitude '{}'", lat.trim())))?;
            let lon: f64 = lon
                .trim()
                .parse()
                .map_err(|_| parse_err(format!("invalid longitude '{}'", lon.trim())))?;
            check_position(lat, lon).map_err(parse_err)?;

            points.push((lat, lon));
        }

        if points.is_empty() {
            return Err(TrackError::Empty);
        }

        Ok(Self { points })
    }

    /// Load a track from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TrackError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let track = Self::parse(&text)?;
        debug!(path = %path.display(), points = track.len(), "Loaded track");
        Ok(track)
    }

    /// Number of positions in the track.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false; a track holds at least one position.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Position at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<(f64, f64)> {
        self.points.get(index).copied()
    }
}

fn check_position(lat: f64, lon: f64) -> std::result::Result<(), String> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(format!("latitude {lat} out of range"));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(format!("longitude {lon} out of range"));
    }
    Ok(())
}
