//! Serialization of extracted rows into the staged object format.
//!
//! Every loader's stage step consumes the exact same artifact: UTF-8 CSV with
//! a byte-order mark and a header row, comma-delimited, gzip-compressed. The
//! pipeline is a pull-based byte stream, so destination backpressure
//! propagates through compression up to the database cursor instead of
//! buffering the full result set.

use std::io::Write;
use std::pin::Pin;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures::{Stream, StreamExt};

use crate::error::{ErrorKind, SluiceResult};
use crate::sluice_error;
use crate::types::RowStream;

/// A backpressured stream of compressed bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = SluiceResult<Bytes>> + Send>>;

/// UTF-8 byte-order mark emitted before the header row.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Compressed bytes accumulated before a chunk is emitted downstream.
const CHUNK_BYTES: usize = 64 * 1024;

struct EncoderState {
    rows: RowStream,
    header: Vec<String>,
    encoder: Option<GzEncoder<Vec<u8>>>,
    header_written: bool,
    done: bool,
}

/// Wraps a row stream into the CSV+gzip staged object format.
///
/// The header row lists the destination column names in projection order; the
/// header is written even when the source yields zero rows, so the staged
/// object is always a parseable CSV.
pub fn csv_gzip_stream(header: Vec<String>, rows: RowStream) -> ByteStream {
    let state = EncoderState {
        rows,
        header,
        encoder: Some(GzEncoder::new(Vec::new(), Compression::default())),
        header_written: false,
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        let item = next_chunk(&mut state).await;

        item.map(|item| (item, state))
    }))
}

async fn next_chunk(state: &mut EncoderState) -> Option<SluiceResult<Bytes>> {
    loop {
        match state.rows.next().await {
            Some(Ok(row)) => {
                if let Err(err) = write_header_once(state) {
                    state.done = true;
                    return Some(Err(err));
                }

                let fields: Vec<String> = row
                    .values()
                    .iter()
                    .map(|value| value.to_csv_field())
                    .collect();
                if let Err(err) = write_record(state, &fields) {
                    state.done = true;
                    return Some(Err(err));
                }

                if let Some(chunk) = take_full_chunk(state) {
                    return Some(Ok(chunk));
                }
            }
            Some(Err(err)) => {
                state.done = true;
                return Some(Err(err));
            }
            None => {
                state.done = true;

                if let Err(err) = write_header_once(state) {
                    return Some(Err(err));
                }

                return Some(finish(state));
            }
        }
    }
}

fn write_header_once(state: &mut EncoderState) -> SluiceResult<()> {
    if state.header_written {
        return Ok(());
    }
    state.header_written = true;

    let encoder = state.encoder.as_mut().expect("encoder still open");
    encoder.write_all(UTF8_BOM)?;

    let header = state.header.clone();
    write_record(state, &header)
}

fn write_record(state: &mut EncoderState, fields: &[String]) -> SluiceResult<()> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(fields)?;
    let record = writer
        .into_inner()
        .map_err(|err| sluice_error!(ErrorKind::SerializationError, "CSV flush failed", err))?;

    let encoder = state.encoder.as_mut().expect("encoder still open");
    encoder.write_all(&record)?;

    Ok(())
}

/// Takes the compressed buffer once it crosses the chunk threshold.
fn take_full_chunk(state: &mut EncoderState) -> Option<Bytes> {
    let encoder = state.encoder.as_mut().expect("encoder still open");
    if encoder.get_ref().len() < CHUNK_BYTES {
        return None;
    }

    Some(Bytes::from(std::mem::take(encoder.get_mut())))
}

fn finish(state: &mut EncoderState) -> SluiceResult<Bytes> {
    let encoder = state.encoder.take().expect("encoder still open");
    let compressed = encoder.finish()?;

    Ok(Bytes::from(compressed))
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::Arc;

    use flate2::read::GzDecoder;

    use super::*;
    use crate::types::{Row, Value};

    fn rows(rows: Vec<Row>) -> RowStream {
        Box::pin(futures::stream::iter(rows.into_iter().map(Ok)))
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let chunks: Vec<Bytes> = stream
            .map(|chunk| chunk.unwrap())
            .collect::<Vec<_>>()
            .await;

        let compressed: Vec<u8> = chunks.concat();
        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();

        decoded
    }

    #[tokio::test]
    async fn output_starts_with_bom_and_header() {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
        let stream = csv_gzip_stream(
            vec!["order_id".to_string(), "order_name".to_string()],
            rows(vec![Row::new(
                columns,
                vec![Value::Int(1), Value::String("first".to_string())],
            )]),
        );

        let decoded = collect(stream).await;

        assert_eq!(&decoded[..3], UTF8_BOM);
        let text = String::from_utf8(decoded[3..].to_vec()).unwrap();
        assert_eq!(text, "order_id,order_name\n1,first\n");
    }

    #[tokio::test]
    async fn zero_rows_still_produce_a_header() {
        let stream = csv_gzip_stream(vec!["id".to_string()], rows(Vec::new()));

        let decoded = collect(stream).await;

        let text = String::from_utf8(decoded[3..].to_vec()).unwrap();
        assert_eq!(text, "id\n");
    }

    #[tokio::test]
    async fn fields_with_commas_are_quoted() {
        let columns: Arc<[String]> = vec!["name".to_string()].into();
        let stream = csv_gzip_stream(
            vec!["name".to_string()],
            rows(vec![Row::new(
                columns,
                vec![Value::String("a,b".to_string())],
            )]),
        );

        let decoded = collect(stream).await;
        let text = String::from_utf8(decoded[3..].to_vec()).unwrap();

        assert_eq!(text, "name\n\"a,b\"\n");
    }

    #[tokio::test]
    async fn source_errors_terminate_the_stream() {
        use crate::error::SluiceError;
        use crate::sluice_error;

        let failing: RowStream = Box::pin(futures::stream::iter(vec![Err::<Row, SluiceError>(
            sluice_error!(ErrorKind::DatabaseError, "cursor died"),
        )]));
        let mut stream = csv_gzip_stream(vec!["id".to_string()], failing);

        let first = stream.next().await.unwrap();
        assert_eq!(first.unwrap_err().kind(), ErrorKind::DatabaseError);
        assert!(stream.next().await.is_none());
    }
}
