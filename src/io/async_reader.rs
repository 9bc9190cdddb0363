//! Asynchronous CSV reader for payment requests
//!
//! Streams payment request rows from a CSV source in batches, tagging each
//! request with its row position so results can be reported in input order.
//!
//! # Architecture
//!
//! ```text
//! CSV Reader → AsyncReader → Batches of SequencedRequest
//!                  ↓
//!           csv_format module
//!           (PaymentCsvRecord, convert_payment_record)
//! ```
//!
//! Rows without usable identifiers (unparsable CSV or UUIDs) are logged and
//! skipped; they still consume a sequence number. Rows that identify a
//! transaction but carry an unparsable amount are passed on as
//! [`RequestRow::Malformed`](crate::core::RequestRow) so they get a result.

use crate::core::SequencedRequest;
use crate::io::csv_format::{convert_payment_record, PaymentCsvRecord};
use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use tracing::warn;

/// Asynchronous CSV reader
///
/// Provides batch reading interface over payment requests.
/// Maintains streaming behavior with constant memory usage.
pub struct AsyncReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
    next_sequence: u64,
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncReader<R> {
    /// Create a new AsyncReader from an async reader
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self {
            csv_reader,
            next_sequence: 0,
        }
    }

    /// Read a batch of payment requests
    ///
    /// # Arguments
    ///
    /// * `batch_size` - Maximum number of rows to consume
    ///
    /// # Returns
    ///
    /// * `Some(batch)` - The successfully converted requests; empty if every row
    ///   consumed was invalid
    /// * `None` - The end of the input was reached
    pub async fn read_batch(&mut self, batch_size: usize) -> Option<Vec<SequencedRequest>> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut consumed = 0;
        let mut records = self.csv_reader.deserialize::<PaymentCsvRecord>();

        while consumed < batch_size {
            let Some(row) = records.next().await else {
                break;
            };
            consumed += 1;
            let sequence = self.next_sequence;
            self.next_sequence += 1;

            match row {
                Ok(csv_record) => match convert_payment_record(csv_record) {
                    Ok(row) => batch.push(SequencedRequest { sequence, row }),
                    Err(e) => warn!(row = sequence, error = %e, "skipping unconvertible request row"),
                },
                Err(e) => warn!(row = sequence, error = %e, "skipping malformed CSV row"),
            }
        }

        (consumed > 0).then_some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RequestRow;
    use crate::types::PaymentRequest;
    use futures::io::Cursor;
    use rust_decimal_macros::dec;

    const HEADER: &str = "transaction,account,mcc,merchant,amount\n";
    const ACCOUNT: &str = "123e4567-e89b-12d3-a456-426614174000";

    fn row(n: u32, amount: &str) -> String {
        format!("00000000-0000-4000-8000-{n:012},{ACCOUNT},5411,PADARIA DO ZE,{amount}\n")
    }

    fn request(item: &SequencedRequest) -> &PaymentRequest {
        match &item.row {
            RequestRow::Request(request) => request,
            other => panic!("expected a request, got {other:?}"),
        }
    }

    fn csv(rows: &[String]) -> String {
        let mut content = HEADER.to_string();
        rows.iter().for_each(|r| content.push_str(r));
        content
    }

    #[tokio::test]
    async fn test_async_reader_read_batch() {
        let content = csv(&[row(1, "100.10"), row(2, "50.00"), row(3, "10.00")]);
        let mut reader = AsyncReader::new(Cursor::new(content.into_bytes()));

        let batch = reader.read_batch(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].sequence, 0);
        assert_eq!(request(&batch[0]).amount, dec!(100.10));
        assert_eq!(batch[1].sequence, 1);

        let batch = reader.read_batch(2).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].sequence, 2);

        assert_eq!(reader.read_batch(2).await, None);
    }

    #[tokio::test]
    async fn test_async_reader_empty_csv() {
        let mut reader = AsyncReader::new(Cursor::new(HEADER.as_bytes().to_vec()));

        assert_eq!(reader.read_batch(10).await, None);
    }

    #[tokio::test]
    async fn test_async_reader_skips_unidentifiable_row_but_keeps_numbering() {
        let content = format!("{HEADER}not-a-uuid,{ACCOUNT},5411,PADARIA DO ZE,1.00\n{}", row(2, "50.00"));
        let mut reader = AsyncReader::new(Cursor::new(content.into_bytes()));

        let batch = reader.read_batch(10).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].sequence, 1);
    }

    #[tokio::test]
    async fn test_async_reader_keeps_row_with_malformed_amount() {
        let content = csv(&[row(1, "abc"), row(2, "50.00")]);
        let mut reader = AsyncReader::new(Cursor::new(content.into_bytes()));

        let batch = reader.read_batch(10).await.unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].sequence, 0);
        assert!(matches!(batch[0].row, RequestRow::Malformed { .. }));
        assert_eq!(request(&batch[1]).amount, dec!(50.00));
    }

    #[tokio::test]
    async fn test_async_reader_invalid_rows_do_not_end_input() {
        let content = format!(
            "{HEADER}bad-1,{ACCOUNT},5411,X,1.00\nbad-2,{ACCOUNT},5411,X,1.00\n{}",
            row(3, "1.00")
        );
        let mut reader = AsyncReader::new(Cursor::new(content.into_bytes()));

        assert_eq!(reader.read_batch(2).await, Some(vec![]));
        let batch = reader.read_batch(2).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].sequence, 2);
        assert_eq!(reader.read_batch(2).await, None);
    }

    #[tokio::test]
    async fn test_async_reader_whitespace_handling() {
        let content = format!("{HEADER}  00000000-0000-4000-8000-000000000001 , {ACCOUNT} , 5411 , PADARIA DO ZE ,  100.0  \n");
        let mut reader = AsyncReader::new(Cursor::new(content.into_bytes()));

        let batch = reader.read_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(request(&batch[0]).merchant, "PADARIA DO ZE");
    }
}
