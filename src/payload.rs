use std::io::{self, Cursor, Read};

use flate2::read::GzDecoder;
use zip::ZipArchive;

use crate::error::IngestError;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];

pub fn unwrap_sensor_log(bytes: Vec<u8>) -> Result<Vec<u8>, IngestError> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(bytes.as_slice());
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|err| IngestError::SensorLog(format!("gunzip: {err}")))?;
        return Ok(out);
    }
    if bytes.starts_with(&ZIP_MAGIC) {
        return extract_first_fit(&bytes);
    }
    Ok(bytes)
}

fn extract_first_fit(bytes: &[u8]) -> Result<Vec<u8>, IngestError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| IngestError::SensorLog(err.to_string()))?;

    let mut fallback = None;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|err| IngestError::SensorLog(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        if entry.name().to_ascii_lowercase().ends_with(".fit") {
            return read_entry(entry);
        }
        fallback.get_or_insert(i);
    }

    let index = fallback
        .ok_or_else(|| IngestError::SensorLog("zip archive contains no files".to_string()))?;
    let entry = archive
        .by_index(index)
        .map_err(|err| IngestError::SensorLog(err.to_string()))?;
    read_entry(entry)
}

fn read_entry<R: Read>(mut entry: R) -> Result<Vec<u8>, IngestError> {
    let mut out = Vec::new();
    io::copy(&mut entry, &mut out).map_err(|err| IngestError::SensorLog(err.to_string()))?;
    Ok(out)
}
