use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Bytes per stored coordinate pair, two 8-byte values.
pub const PAIR_SIZE: usize = 16;

/// A blob whose length is not a whole number of coordinate pairs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("blob of {length} bytes is not a whole number of 16-byte pairs")]
pub struct BlobLengthError {
    pub length: usize,
}

/// Encodes float pairs as a flat little-endian f64 array
///
/// # Arguments
///
/// * `points` - N pairs, stored row-major as `x0 y0 x1 y1 ...`
///
/// # Returns
///
/// * `blob` - N * 16 bytes
///
pub fn f64_pairs_to_blob(points: &[[f64; 2]]) -> Vec<u8> {
    let flat: Vec<f64> = points.iter().flat_map(|p| p.iter().copied()).collect();
    let mut blob = vec![0u8; flat.len() * 8];
    LittleEndian::write_f64_into(&flat, &mut blob);
    blob
}

/// Encodes integer pairs as a flat little-endian i64 array
pub fn i64_pairs_to_blob(spots: &[[i64; 2]]) -> Vec<u8> {
    let flat: Vec<i64> = spots.iter().flat_map(|p| p.iter().copied()).collect();
    let mut blob = vec![0u8; flat.len() * 8];
    LittleEndian::write_i64_into(&flat, &mut blob);
    blob
}

/// Decodes a flat little-endian f64 array into N x 2 pairs
///
/// # Arguments
///
/// * `blob` - bytes as written by [`f64_pairs_to_blob`]
///
/// # Returns
///
/// * `points` - the pairs, or an error if the length is not a multiple of 16
///
pub fn blob_to_f64_pairs(blob: &[u8]) -> Result<Vec<[f64; 2]>, BlobLengthError> {
    if blob.len() % PAIR_SIZE != 0 {
        return Err(BlobLengthError { length: blob.len() });
    }
    let mut flat = vec![0.0f64; blob.len() / 8];
    LittleEndian::read_f64_into(blob, &mut flat);
    Ok(flat.chunks_exact(2).map(|c| [c[0], c[1]]).collect())
}

/// Decodes a flat little-endian i64 array into N x 2 pairs
pub fn blob_to_i64_pairs(blob: &[u8]) -> Result<Vec<[i64; 2]>, BlobLengthError> {
    if blob.len() % PAIR_SIZE != 0 {
        return Err(BlobLengthError { length: blob.len() });
    }
    let mut flat = vec![0i64; blob.len() / 8];
    LittleEndian::read_i64_into(blob, &mut flat);
    Ok(flat.chunks_exact(2).map(|c| [c[0], c[1]]).collect())
}

/// Parses a stored number list such as `[1.0, 2.5, nan]` or `(1, 2)`.
///
/// Empty entries are skipped; `None` if any entry is not a number.
pub fn parse_number_list(text: &str) -> Option<Vec<f64>> {
    let inner = text
        .trim()
        .trim_start_matches(['[', '('])
        .trim_end_matches([']', ')']);
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f64_blob_layout() {
        let blob = f64_pairs_to_blob(&[[1.0, 2.0], [3.5, -4.0]]);
        assert_eq!(blob.len(), 32);
        assert_eq!(&blob[0..8], &1.0f64.to_le_bytes());
        assert_eq!(&blob[24..32], &(-4.0f64).to_le_bytes());
        assert_eq!(blob_to_f64_pairs(&blob).unwrap(), vec![[1.0, 2.0], [3.5, -4.0]]);
    }

    #[test]
    fn test_i64_blob_layout() {
        let blob = i64_pairs_to_blob(&[[10, 20], [15, 20]]);
        assert_eq!(&blob[8..16], &20i64.to_le_bytes());
        assert_eq!(blob_to_i64_pairs(&blob).unwrap(), vec![[10, 20], [15, 20]]);
        assert!(blob_to_i64_pairs(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_blob_length_checked() {
        assert_eq!(blob_to_f64_pairs(&[0u8; 24]).unwrap_err(), BlobLengthError { length: 24 });
    }

    #[test]
    fn test_parse_number_list() {
        assert_eq!(parse_number_list("[1.0, 2.5, 3]"), Some(vec![1.0, 2.5, 3.0]));
        assert_eq!(parse_number_list("[]"), Some(vec![]));
        assert!(parse_number_list("[1.0, nan]").unwrap()[1].is_nan());
        assert_eq!(parse_number_list("[1.0, x]"), None);
    }
}
