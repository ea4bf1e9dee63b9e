//! Mapping message decoding
//!
//! Decoding is all-or-nothing: either every record of the payload is valid
//! for the configured mode, or the whole batch is rejected.

use mapper_common::types::{FileIdMapping, MapperMode, MappingRecord, StableIdMapping};

use crate::error::DecodeError;

/// Decode a raw payload into the ordered records of one batch
pub fn decode(mode: MapperMode, payload: &[u8]) -> Result<Vec<MappingRecord>, DecodeError> {
    let records: Vec<MappingRecord> = match mode {
        MapperMode::Resolve => serde_json::from_slice::<Vec<StableIdMapping>>(payload)?
            .into_iter()
            .map(MappingRecord::from)
            .collect(),
        MapperMode::Direct => serde_json::from_slice::<Vec<FileIdMapping>>(payload)?
            .into_iter()
            .map(MappingRecord::from)
            .collect(),
    };

    for (index, record) in records.iter().enumerate() {
        validate(index, record)?;
    }

    Ok(records)
}

/// Parse the decimal file id carried by a direct-mode record
pub fn parse_file_id(raw: &str) -> Result<i64, String> {
    let file_id: i64 = raw
        .trim()
        .parse()
        .map_err(|e| format!("fileId '{}' is not an integer: {}", raw, e))?;

    if file_id < 0 {
        return Err(format!("fileId '{}' must not be negative", raw));
    }

    Ok(file_id)
}

fn validate(index: usize, record: &MappingRecord) -> Result<(), DecodeError> {
    if record.dataset_id().trim().is_empty() {
        return Err(DecodeError::invalid_record(index, "datasetId is empty"));
    }

    match record {
        MappingRecord::StableId(m) if m.stable_id.trim().is_empty() => {
            Err(DecodeError::invalid_record(index, "stableId is empty"))
        },
        MappingRecord::FileId(m) => parse_file_id(&m.file_id)
            .map(|_| ())
            .map_err(|reason| DecodeError::invalid_record(index, reason)),
        MappingRecord::StableId(_) => Ok(()),
    }
}
