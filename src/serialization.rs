//! Saving and loading of SDRs, connection graphs and Temporal Memories.
//!
//! Every stream starts with a header naming the magic `MNEM`, the type tag and
//! the state layout version of the stored value. Readers check the header
//! before touching the payload, so loading a stream written for another type
//! or layout fails with [`MnemosError::VersionMismatch`] instead of
//! misinterpreting bytes.
//!
//! # Supported Formats
//!
//! - **Binary** - `bincode`: the header, then the payload
//! - **JSON** - `serde_json`: `{ "header": {..}, "payload": {..} }`
//!
//! # Example
//!
//! ```rust
//! use mnemos::prelude::*;
//!
//! let mut tm = TemporalMemory::new(TemporalMemoryParams {
//!     column_dimensions: vec![32],
//!     cells_per_column: 4,
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! let mut columns = Sdr::new(&[32]);
//! columns.set_sparse(&[1, 2, 3]).unwrap();
//! tm.compute(&columns, true).unwrap();
//!
//! let bytes = tm.to_bytes(SerializableFormat::Binary).unwrap();
//! let restored = TemporalMemory::from_bytes(&bytes, SerializableFormat::Binary).unwrap();
//! assert_eq!(tm, restored);
//! ```

use crate::algorithms::{Connections, TemporalMemory, TemporalMemoryParams, TM_VERSION};
use crate::error::{MnemosError, Result};
use crate::types::Sdr;

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// Magic string opening every persisted stream.
pub const MAGIC: &str = "MNEM";

/// Upper bound on the encoded header size, so garbage input cannot trigger a
/// huge allocation before the header is rejected.
const HEADER_LIMIT: u64 = 1024;

/// Serialization format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializableFormat {
    /// Compact binary serialization (default).
    #[default]
    Binary,

    /// Human-readable JSON format.
    Json,
}

impl std::fmt::Display for SerializableFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializableFormat::Binary => write!(f, "BINARY"),
            SerializableFormat::Json => write!(f, "JSON"),
        }
    }
}

impl std::str::FromStr for SerializableFormat {
    type Err = MnemosError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "BINARY" | "BIN" => Ok(SerializableFormat::Binary),
            "JSON" => Ok(SerializableFormat::Json),
            _ => Err(MnemosError::InvalidParameter {
                name: "format",
                message: format!("Unknown format '{s}'. Expected: BINARY, JSON"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Header {
    magic: String,
    tag: String,
    version: u32,
}

impl Header {
    fn for_type<T: Serializable>() -> Self {
        Self {
            magic: MAGIC.to_string(),
            tag: T::TYPE_TAG.to_string(),
            version: T::FORMAT_VERSION,
        }
    }

    fn check<T: Serializable>(&self) -> Result<()> {
        let expected = Self::for_type::<T>();
        if *self != expected {
            return Err(MnemosError::VersionMismatch {
                tag: T::TYPE_TAG.to_string(),
                expected: expected.to_string(),
                found: self.to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.magic, self.tag, self.version)
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    header: Header,
    payload: &'a T,
}

// The header was already checked through `HeaderOnly`; serde skips it here.
#[derive(Deserialize)]
struct PayloadOnly<T> {
    payload: T,
}

#[derive(Deserialize)]
struct HeaderOnly {
    header: Header,
}

fn serialization_error(context: &str, e: impl std::fmt::Display) -> MnemosError {
    MnemosError::SerializationError {
        message: format!("{context}: {e}"),
    }
}

fn io_error(context: &str, e: &std::io::Error) -> MnemosError {
    MnemosError::IoError {
        message: format!("{context}: {e}"),
    }
}

/// Types that can be saved to and loaded from a versioned stream.
pub trait Serializable: Serialize + DeserializeOwned + Sized {
    /// Type tag written into the header.
    const TYPE_TAG: &'static str;

    /// State layout version written into the header.
    const FORMAT_VERSION: u32;

    /// Checks invariants that span fields of a freshly decoded value.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistency found.
    fn check_loaded(&self) -> Result<()> {
        Ok(())
    }

    /// Serializes to a byte vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded.
    fn to_bytes(&self, format: SerializableFormat) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.save(&mut bytes, format)?;
        Ok(bytes)
    }

    /// Deserializes from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::VersionMismatch`] for a foreign header and
    /// [`MnemosError::SerializationError`] for a truncated or corrupt stream.
    fn from_bytes(bytes: &[u8], format: SerializableFormat) -> Result<Self> {
        Self::load(bytes, format)
    }

    /// Serializes to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded.
    fn to_json(&self) -> Result<String> {
        let envelope = EnvelopeRef {
            header: Header::for_type::<Self>(),
            payload: self,
        };
        serde_json::to_string_pretty(&envelope)
            .map_err(|e| serialization_error("JSON serialization failed", e))
    }

    /// Deserializes from a JSON string.
    ///
    /// # Errors
    ///
    /// Same as [`Serializable::from_bytes`].
    fn from_json(json: &str) -> Result<Self> {
        Self::load(json.as_bytes(), SerializableFormat::Json)
    }

    /// Serializes to a writer.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    fn save<W: Write>(&self, writer: W, format: SerializableFormat) -> Result<()> {
        let mut writer = BufWriter::new(writer);
        let header = Header::for_type::<Self>();

        match format {
            SerializableFormat::Binary => {
                bincode::serialize_into(&mut writer, &header)
                    .and_then(|()| bincode::serialize_into(&mut writer, self))
                    .map_err(|e| serialization_error("Binary serialization failed", e))?;
            }
            SerializableFormat::Json => {
                let envelope = EnvelopeRef {
                    header,
                    payload: self,
                };
                serde_json::to_writer_pretty(&mut writer, &envelope)
                    .map_err(|e| serialization_error("JSON serialization failed", e))?;
            }
        }

        writer
            .flush()
            .map_err(|e| io_error("Failed to flush writer", &e))?;
        debug!(tag = Self::TYPE_TAG, version = Self::FORMAT_VERSION, %format, "saved");
        Ok(())
    }

    /// Deserializes from a reader.
    ///
    /// # Errors
    ///
    /// Same as [`Serializable::from_bytes`].
    fn load<R: Read>(reader: R, format: SerializableFormat) -> Result<Self> {
        let mut reader = BufReader::new(reader);

        let value: Self = match format {
            SerializableFormat::Binary => {
                let header: Header = bincode::options()
                    .with_fixint_encoding()
                    .with_limit(HEADER_LIMIT)
                    .allow_trailing_bytes()
                    .deserialize_from(&mut reader)
                    .map_err(|e| serialization_error("Binary header unreadable", e))?;
                header.check::<Self>()?;

                bincode::deserialize_from(&mut reader)
                    .map_err(|e| serialization_error("Binary deserialization failed", e))?
            }
            SerializableFormat::Json => {
                let mut bytes = Vec::new();
                reader
                    .read_to_end(&mut bytes)
                    .map_err(|e| io_error("Failed to read stream", &e))?;

                let HeaderOnly { header } = serde_json::from_slice(&bytes)
                    .map_err(|e| serialization_error("JSON header unreadable", e))?;
                header.check::<Self>()?;

                let PayloadOnly { payload } = serde_json::from_slice(&bytes)
                    .map_err(|e| serialization_error("JSON deserialization failed", e))?;
                payload
            }
        };

        value.check_loaded()?;
        debug!(tag = Self::TYPE_TAG, version = Self::FORMAT_VERSION, %format, "loaded");
        Ok(value)
    }

    /// Saves to a file.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::IoError`] if the file cannot be created.
    fn save_to_file<P: AsRef<Path>>(&self, path: P, format: SerializableFormat) -> Result<()> {
        let file = File::create(path.as_ref())
            .map_err(|e| io_error("Failed to create file", &e))?;
        self.save(file, format)
    }

    /// Loads from a file.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::IoError`] if the file cannot be opened.
    fn load_from_file<P: AsRef<Path>>(path: P, format: SerializableFormat) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| io_error("Failed to open file", &e))?;
        Self::load(file, format)
    }

    /// Saves to a file, inferring format from the file extension.
    ///
    /// - `.json` -> JSON format
    /// - All other extensions -> Binary format
    ///
    /// # Errors
    ///
    /// Same as [`Serializable::save_to_file`].
    fn save_to_file_auto<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let format = infer_format_from_path(path.as_ref());
        self.save_to_file(path, format)
    }

    /// Loads from a file, inferring format from the file extension.
    ///
    /// # Errors
    ///
    /// Same as [`Serializable::load_from_file`].
    fn load_from_file_auto<P: AsRef<Path>>(path: P) -> Result<Self> {
        let format = infer_format_from_path(path.as_ref());
        Self::load_from_file(path, format)
    }
}

impl Serializable for Sdr {
    const TYPE_TAG: &'static str = "Sdr";
    const FORMAT_VERSION: u32 = 1;
}

impl Serializable for Connections {
    const TYPE_TAG: &'static str = "Connections";
    const FORMAT_VERSION: u32 = 1;
}

impl Serializable for TemporalMemory {
    const TYPE_TAG: &'static str = "TemporalMemory";
    const FORMAT_VERSION: u32 = TM_VERSION;

    fn check_loaded(&self) -> Result<()> {
        self.check_loaded_state()
    }
}

impl Serializable for TemporalMemoryParams {
    const TYPE_TAG: &'static str = "TemporalMemoryParams";
    const FORMAT_VERSION: u32 = 1;

    fn check_loaded(&self) -> Result<()> {
        self.validate()
    }
}

/// Infers serialization format from file extension.
fn infer_format_from_path(path: &Path) -> SerializableFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => SerializableFormat::Json,
        _ => SerializableFormat::Binary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn sample_sdr() -> Sdr {
        let mut sdr = Sdr::new(&[100]);
        sdr.set_sparse(&[1, 5, 10, 50, 99]).unwrap();
        sdr
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(
            "BINARY".parse::<SerializableFormat>().unwrap(),
            SerializableFormat::Binary
        );
        assert_eq!(
            "json".parse::<SerializableFormat>().unwrap(),
            SerializableFormat::Json
        );
        assert!("unknown".parse::<SerializableFormat>().is_err());
    }

    #[test]
    fn test_format_display() {
        assert_eq!(SerializableFormat::Binary.to_string(), "BINARY");
        assert_eq!(SerializableFormat::Json.to_string(), "JSON");
    }

    #[test]
    fn test_sdr_binary_serialization() {
        let sdr = sample_sdr();
        let bytes = sdr.to_bytes(SerializableFormat::Binary).unwrap();

        let restored = Sdr::from_bytes(&bytes, SerializableFormat::Binary).unwrap();
        assert_eq!(restored, sdr);
        assert_eq!(restored.dimensions(), &[100]);
    }

    #[test]
    fn test_sdr_json_serialization() {
        let sdr = sample_sdr();
        let json = sdr.to_json().unwrap();
        assert!(json.contains("\"magic\": \"MNEM\""));
        assert!(json.contains("\"tag\": \"Sdr\""));
        assert!(json.contains("sparse"));

        let restored = Sdr::from_json(&json).unwrap();
        assert_eq!(restored, sdr);
    }

    #[test]
    fn test_equal_values_give_identical_bytes() {
        let a = sample_sdr();
        let mut b = Sdr::new(&[100]);
        b.set_dense(&a.get_dense()).unwrap();

        assert_eq!(
            a.to_bytes(SerializableFormat::Binary).unwrap(),
            b.to_bytes(SerializableFormat::Binary).unwrap()
        );
    }

    #[test]
    fn test_wrong_type_is_version_mismatch() {
        let bytes = sample_sdr().to_bytes(SerializableFormat::Binary).unwrap();
        let err = Connections::from_bytes(&bytes, SerializableFormat::Binary).unwrap_err();
        assert!(matches!(err, MnemosError::VersionMismatch { .. }));
        assert!(err.to_string().contains("MNEM:Sdr@1"));

        let json = sample_sdr().to_json().unwrap();
        let err = Connections::from_json(&json).unwrap_err();
        assert!(matches!(err, MnemosError::VersionMismatch { .. }));
    }

    #[test]
    fn test_wrong_version_is_version_mismatch() {
        let json = sample_sdr()
            .to_json()
            .unwrap()
            .replace("\"version\": 1", "\"version\": 99");
        let err = Sdr::from_json(&json).unwrap_err();
        assert!(matches!(err, MnemosError::VersionMismatch { .. }));
    }

    #[test]
    fn test_truncated_stream() {
        let bytes = sample_sdr().to_bytes(SerializableFormat::Binary).unwrap();
        for len in [0, 3, bytes.len() / 2, bytes.len() - 1] {
            let err = Sdr::from_bytes(&bytes[..len], SerializableFormat::Binary).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Serialization);
        }

        let json = sample_sdr().to_json().unwrap();
        let err = Sdr::from_json(&json[..json.len() / 2]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }

    #[test]
    fn test_garbage_stream() {
        let garbage = [0xffu8; 64];
        let err = Sdr::from_bytes(&garbage, SerializableFormat::Binary).unwrap_err();
        assert!(matches!(err, MnemosError::SerializationError { .. }));
    }

    #[test]
    fn test_params_round_trip() {
        let params = TemporalMemoryParams {
            column_dimensions: vec![16, 16],
            cells_per_column: 8,
            seed: 7,
            ..Default::default()
        };
        let json = params.to_json().unwrap();
        assert_eq!(TemporalMemoryParams::from_json(&json).unwrap(), params);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("mnemos-sdr-{}.json", std::process::id()));

        let sdr = sample_sdr();
        sdr.save_to_file_auto(&path).unwrap();
        let restored = Sdr::load_from_file_auto(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(restored, sdr);
        assert!(matches!(
            Sdr::load_from_file(&path, SerializableFormat::Binary),
            Err(MnemosError::IoError { .. })
        ));
    }

    #[test]
    fn test_infer_format() {
        assert_eq!(
            infer_format_from_path(Path::new("model.json")),
            SerializableFormat::Json
        );
        assert_eq!(
            infer_format_from_path(Path::new("model.bin")),
            SerializableFormat::Binary
        );
        assert_eq!(
            infer_format_from_path(Path::new("model")),
            SerializableFormat::Binary
        );
        assert_eq!(
            infer_format_from_path(Path::new("path/to/model.JSON")),
            SerializableFormat::Binary // case-sensitive
        );
    }
}
