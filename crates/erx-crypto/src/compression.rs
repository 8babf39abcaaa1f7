//! Dictionary-based Zstd compression for database values.
//!
//! Values are compressed before encryption. Small payloads of a known shape
//! compress far better against a pre-trained dictionary, so the codec selects
//! one of a fixed set of dictionaries per column family. The selector is NOT
//! stored in the encoded blob; every column uses one selector by convention
//! and must decode with the same one.

use std::io::{Read, Write};

use crate::errors::CryptoError;

/// Compression level for database values. Write latency dominates here,
/// so favour speed.
const LEVEL: i32 = 3;

/// Dictionary sample for JSON payloads (FHIR bundles, communication
/// messages, audit metadata). Content-only dictionary: raw concatenated
/// samples of the shapes that dominate the stored data.
const DICTIONARY_JSON: &[u8] = br#"{"resourceType":"Bundle","id":"","meta":{"profile":[""]},"type":"document","timestamp":"","entry":[{"fullUrl":"","resource":{"resourceType":"Composition","status":"final","subject":{"identifier":{"system":"http://fhir.de/sid/gkv/kvid-10","value":""}}}}]}{"resourceType":"Communication","status":"unknown","sent":"","payload":[{"contentString":""}]}{"resourceType":"MedicationDispense","status":"completed","whenHandedOver":"","performer":[{"actor":{"identifier":{"system":"https://gematik.de/fhir/sid/telematik-id","value":""}}}]}"#;

/// Dictionary sample for XML payloads (signed CAdES containers, receipts).
const DICTIONARY_XML: &[u8] = br#"<?xml version="1.0" encoding="utf-8"?><Bundle xmlns="http://hl7.org/fhir"><id value=""/><meta><profile value=""/></meta><type value="document"/><timestamp value=""/><entry><fullUrl value=""/><resource><Composition><status value="final"/></Composition></resource></entry></Bundle>"#;

/// Selector for the pre-trained compression dictionary of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryUse {
    /// JSON payloads: bundles, messages, identity snapshots, metadata.
    DefaultJson,
    /// XML payloads: signed prescription/dispense/receipt containers.
    DefaultXml,
}

impl DictionaryUse {
    fn dictionary(self) -> &'static [u8] {
        match self {
            DictionaryUse::DefaultJson => DICTIONARY_JSON,
            DictionaryUse::DefaultXml => DICTIONARY_XML,
        }
    }
}

/// Compress data against the selected dictionary.
pub fn compress(data: &[u8], dict_use: DictionaryUse) -> Result<Vec<u8>, CryptoError> {
    let dictionary = zstd::dict::EncoderDictionary::copy(dict_use.dictionary(), LEVEL);
    let mut output = Vec::new();
    let mut encoder = zstd::stream::Encoder::with_prepared_dictionary(&mut output, &dictionary)
        .map_err(CryptoError::CompressFailed)?;
    encoder.write_all(data).map_err(CryptoError::CompressFailed)?;
    encoder.finish().map_err(CryptoError::CompressFailed)?;
    Ok(output)
}

/// Decompress data against the selected dictionary.
pub fn decompress(data: &[u8], dict_use: DictionaryUse) -> Result<Vec<u8>, CryptoError> {
    let dictionary = zstd::dict::DecoderDictionary::copy(dict_use.dictionary());
    let mut output = Vec::new();
    let mut decoder = zstd::stream::Decoder::with_prepared_dictionary(data, &dictionary)
        .map_err(CryptoError::DecompressFailed)?;
    decoder
        .read_to_end(&mut output)
        .map_err(CryptoError::DecompressFailed)?;
    Ok(output)
}
