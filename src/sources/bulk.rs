//! Bulk gzip downloader
//!
//! Fetches a whole compressed dump in one GET and keeps the decompressed
//! bytes in memory so they can be read more than once.

use std::io::{BufRead, Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use serde_json::Value;
use tracing::{debug, info};

use super::{PayloadShape, Transport};
use crate::error::{IngestionError, Result};
use crate::http_client::ResilientHttpClient;
use crate::schemas::RawRecord;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub struct BulkDownloader {
    client: Arc<ResilientHttpClient>,
    url: String,
    shape: PayloadShape,
    data: Option<Cursor<Vec<u8>>>,
}

impl BulkDownloader {
    pub fn new(client: Arc<ResilientHttpClient>, url: impl Into<String>, shape: PayloadShape) -> Self {
        Self {
            client,
            url: url.into(),
            shape,
            data: None,
        }
    }

    pub fn is_fetched(&self) -> bool {
        self.data.is_some()
    }

    /// Downloads and decompresses the dump
    pub async fn download(&mut self) -> Result<usize> {
        let body = self.client.get_bytes(&self.url).await?;
        let compressed = body.len();
        let decoded = decompress(body)?;
        let size = decoded.len();

        debug!(url = %self.url, compressed, decompressed = size, "Bulk payload downloaded");
        self.data = Some(Cursor::new(decoded));
        Ok(size)
    }

    /// The decompressed stream, rewound to its start
    pub fn reader(&mut self) -> Result<&mut Cursor<Vec<u8>>> {
        let data = self
            .data
            .as_mut()
            .ok_or_else(|| IngestionError::NotFetched(self.url.clone()))?;
        data.seek(SeekFrom::Start(0))?;
        Ok(data)
    }

    /// Parses the body as newline-delimited JSON, skipping blank lines
    pub fn read_json_lines(&mut self) -> Result<Vec<RawRecord>> {
        let reader = self.reader()?;
        let mut records = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| IngestionError::Parse(format!("line {}: {e}", index + 1)))?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line)
                .map_err(|e| IngestionError::Parse(format!("line {}: {e}", index + 1)))?;
            records.push(record);
        }

        Ok(records)
    }

    /// Parses the body as a single JSON document
    pub fn read_json_document(&mut self) -> Result<Value> {
        let reader = self.reader()?;
        serde_json::from_reader(reader).map_err(|e| IngestionError::Parse(e.to_string()))
    }
}

#[async_trait]
impl Transport for BulkDownloader {
    fn target(&self) -> &str {
        &self.url
    }

    async fn fetch(&mut self) -> Result<usize> {
        self.download().await
    }

    fn parse(&mut self) -> Result<Vec<RawRecord>> {
        let records = match self.shape {
            PayloadShape::JsonLines => self.read_json_lines()?,
            PayloadShape::Document => document_records(self.read_json_document()?)?,
        };

        info!(url = %self.url, records = records.len(), "Bulk payload parsed");
        Ok(records)
    }
}

/// Splits a document into records: array elements, or the object itself
pub fn document_records(document: Value) -> Result<Vec<RawRecord>> {
    match document {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![document]),
        other => Err(IngestionError::Parse(format!(
            "expected a JSON array or object, found {}",
            json_type(&other)
        ))),
    }
}

/// Gunzips `body`; bodies the HTTP layer already decoded pass through
fn decompress(body: Vec<u8>) -> Result<Vec<u8>> {
    if !body.starts_with(&GZIP_MAGIC) {
        return Ok(body);
    }

    let mut decoded = Vec::with_capacity(body.len() * 4);
    MultiGzDecoder::new(body.as_slice())
        .read_to_end(&mut decoded)
        .map_err(|e| IngestionError::Parse(format!("gzip: {e}")))?;
    Ok(decoded)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(raw: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn loaded(body: &str, shape: PayloadShape) -> BulkDownloader {
        let client = Arc::new(ResilientHttpClient::with_defaults().unwrap());
        let mut downloader = BulkDownloader::new(client, "http://localhost/dump.json.gz", shape);
        downloader.data = Some(Cursor::new(decompress(gzip(body)).unwrap()));
        downloader
    }

    #[test]
    fn test_read_before_fetch_fails() {
        let client = Arc::new(ResilientHttpClient::with_defaults().unwrap());
        let mut downloader = BulkDownloader::new(client, "http://localhost/x.gz", PayloadShape::JsonLines);

        assert!(!downloader.is_fetched());
        let err = downloader.read_json_lines().unwrap_err();
        assert!(matches!(err, IngestionError::NotFetched(_)));
        let err = downloader.read_json_document().unwrap_err();
        assert!(matches!(err, IngestionError::NotFetched(_)));
    }

    #[test]
    fn test_json_lines_in_order_and_rereadable() {
        let mut downloader = loaded("{\"n\":1}\n\n{\"n\":2}\n{\"n\":3}\n", PayloadShape::JsonLines);

        let first = downloader.read_json_lines().unwrap();
        let second = downloader.read_json_lines().unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(first[0]["n"], 1);
        assert_eq!(first[2]["n"], 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_line_is_parse_error() {
        let mut downloader = loaded("{\"n\":1}\n{oops\n", PayloadShape::JsonLines);
        let err = downloader.parse().unwrap_err();
        assert!(matches!(err, IngestionError::Parse(ref m) if m.starts_with("line 2")));
    }

    #[test]
    fn test_document_array_splits_into_records() {
        let mut downloader = loaded("[{\"city_name\":\"A\"},{\"city_name\":\"B\"}]", PayloadShape::Document);
        let records = downloader.parse().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["city_name"], "B");
    }

    #[test]
    fn test_document_scalar_is_parse_error() {
        let mut downloader = loaded("42", PayloadShape::Document);
        let err = downloader.parse().unwrap_err();
        assert!(err.to_string().contains("found a number"));
    }

    #[test]
    fn test_plain_body_passes_through() {
        let body = b"{\"n\":1}\n".to_vec();
        assert_eq!(decompress(body.clone()).unwrap(), body);
    }

    #[test]
    fn test_corrupt_gzip_is_parse_error() {
        let mut body = gzip("{\"n\":1}\n");
        body.truncate(12);
        assert!(matches!(decompress(body), Err(IngestionError::Parse(_))));
    }
}
