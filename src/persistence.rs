// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::travel_times::TravelTimeInfo;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode travel times: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode travel times: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("unsupported travel time file version {found}, expected {expected}")]
    Version { found: u32, expected: u32 },
}

/// One aggregation run as written to disk.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PersistedTravelTimes {
    pub version: u32,
    pub created_at_ms: i64,
    pub travel_times: Vec<TravelTimeInfo>,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_compressed(
    temp_path: &Path,
    persisted: &PersistedTravelTimes,
) -> Result<(), PersistenceError> {
    let file = File::create(temp_path).map_err(io_error(temp_path))?;
    let mut encoder =
        flate2::write::ZlibEncoder::new(BufWriter::new(file), flate2::Compression::default());

    let config = bincode::config::legacy();
    bincode::serde::encode_into_std_write(persisted, &mut encoder, config)?;

    let mut writer = encoder.finish().map_err(io_error(temp_path))?;
    writer.flush().map_err(io_error(temp_path))?;

    Ok(())
}

/// Writes zlib compressed bincode next to `path` and renames it into place,
/// so readers never see half a file. The temporary file is removed when
/// either step fails.
pub fn save_travel_times(
    path: &Path,
    travel_times: &[TravelTimeInfo],
    created_at_ms: i64,
) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
    }

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let persisted = PersistedTravelTimes {
        version: FORMAT_VERSION,
        created_at_ms,
        travel_times: travel_times.to_vec(),
    };

    let written = write_compressed(&temp_path, &persisted)
        .and_then(|()| std::fs::rename(&temp_path, path).map_err(io_error(path)));

    if let Err(e) = written {
        match std::fs::remove_file(&temp_path) {
            Err(remove_error) if remove_error.kind() != std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %temp_path.display(),
                    "Could not remove partial travel time file: {}",
                    remove_error
                );
            }
            _ => {}
        }
        return Err(e);
    }

    tracing::info!(
        path = %path.display(),
        travel_times = travel_times.len(),
        "Saved travel times"
    );

    Ok(())
}

pub fn load_travel_times(path: &Path) -> Result<PersistedTravelTimes, PersistenceError> {
    let file = File::open(path).map_err(io_error(path))?;
    let mut decoder = flate2::read::ZlibDecoder::new(BufReader::new(file));

    let config = bincode::config::legacy();
    let persisted: PersistedTravelTimes =
        bincode::serde::decode_from_std_read(&mut decoder, config)?;

    if persisted.version != FORMAT_VERSION {
        return Err(PersistenceError::Version {
            found: persisted.version,
            expected: FORMAT_VERSION,
        });
    }

    Ok(persisted)
}
