//! Turning a base64 [`FileInput`] into an uploaded URL.
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use tracing::debug;

use crate::bubble::{PhotoStore, UploadError, UploadFile};
use crate::payload::FileInput;

const DATA_URL_MARKER: &str = "base64,";

/// Clients send both padded and unpadded base64.
const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Drop everything up to and including a `...;base64,` marker.
pub fn strip_data_url_prefix(raw: &str) -> &str {
    match raw.find(DATA_URL_MARKER) {
        Some(idx) => &raw[idx + DATA_URL_MARKER.len()..],
        None => raw,
    }
}

/// Decode a file input. `Ok(None)` means there was nothing to upload.
pub fn decode_file(file: &FileInput) -> Result<Option<UploadFile>, UploadError> {
    let cleaned: String = strip_data_url_prefix(&file.base64)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Ok(None);
    }
    let bytes = STANDARD_LENIENT
        .decode(cleaned.as_bytes())
        .or_else(|_| URL_SAFE_LENIENT.decode(cleaned.as_bytes()))
        .map_err(|e| UploadError::Decode(e.to_string()))?;
    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(Some(UploadFile {
        name: file.filename_or_default().to_string(),
        content_type: file.content_type_or_default().to_string(),
        bytes,
    }))
}

/// Decode and upload one file. `Ok(None)` when the input was empty.
pub async fn upload(store: &dyn PhotoStore, file: &FileInput) -> Result<Option<String>, UploadError> {
    let Some(decoded) = decode_file(file)? else {
        debug!("empty base64 input, nothing to upload");
        return Ok(None);
    };
    store.upload_file(&decoded).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(b64: &str) -> FileInput {
        FileInput {
            base64: b64.into(),
            filename: None,
            content_type: Some("image/png".into()),
        }
    }

    #[test]
    fn strips_data_url_marker() {
        assert_eq!(strip_data_url_prefix("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_url_prefix("AAAA"), "AAAA");
    }

    #[test]
    fn decodes_with_defaults() {
        let file = decode_file(&input("data:image/png;base64,aGVs\nbG8=")).unwrap().unwrap();
        assert_eq!(file.bytes, b"hello");
        assert_eq!(file.name, "upload.bin");
        assert_eq!(file.content_type, "image/png");
    }

    #[test]
    fn empty_input_is_skipped() {
        assert_eq!(decode_file(&input("")).unwrap(), None);
        assert_eq!(decode_file(&input("data:image/png;base64,")).unwrap(), None);
        assert_eq!(decode_file(&input("  \n ")).unwrap(), None);
    }

    #[test]
    fn invalid_base64_is_a_decode_error() {
        let err = decode_file(&input("not*base64!")).unwrap_err();
        assert!(matches!(err, UploadError::Decode(_)));
    }

    #[test]
    fn url_safe_alphabet_is_accepted() {
        // 0xfb 0xff encodes to "-_8=" in the url-safe alphabet
        let file = decode_file(&input("-_8=")).unwrap().unwrap();
        assert_eq!(file.bytes, vec![0xfb, 0xff]);
    }

    #[test]
    fn missing_padding_is_accepted() {
        let file = decode_file(&input("aGVsbG8")).unwrap().unwrap();
        assert_eq!(file.bytes, b"hello");

        let file = decode_file(&input("-_8")).unwrap().unwrap();
        assert_eq!(file.bytes, vec![0xfb, 0xff]);
    }
}
