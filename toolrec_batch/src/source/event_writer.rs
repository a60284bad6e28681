use super::{SourceError, COUNT_COLUMN, ITEM_COLUMN, TIME_COLUMN, USER_COLUMN};
use crate::loader::RawInteraction;
use arrow_array::{ArrayRef, Int64Array, RecordBatch, StringArray, TimestampMillisecondArray};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use parquet::arrow::ArrowWriter;
use std::{fs::File, sync::Arc};
use toolrec::ExternalId;
use tracing::info;

/// Records interaction events in the layout `read_events` expects
pub fn write_events(events: &[RawInteraction], output_name: &str) -> Result<(), SourceError> {
    let (user_type, users) = id_array(events.iter().map(|e| e.user_id.as_ref()));
    let (item_type, items) = id_array(events.iter().map(|e| e.item_id.as_ref()));

    // Naive UTC milliseconds
    let times: Vec<Option<i64>> = events
        .iter()
        .map(|e| e.event_time.map(|t| t.timestamp_millis()))
        .collect();
    let counts: Vec<Option<i64>> = events.iter().map(|e| e.count).collect();

    let schema = Schema::new(vec![
        Field::new(USER_COLUMN, user_type, true),
        Field::new(ITEM_COLUMN, item_type, true),
        Field::new(
            TIME_COLUMN,
            DataType::Timestamp(TimeUnit::Millisecond, None),
            true,
        ),
        Field::new(COUNT_COLUMN, DataType::Int64, true),
    ]);

    let records: Vec<ArrayRef> = vec![
        users,
        items,
        Arc::new(TimestampMillisecondArray::from(times)),
        Arc::new(Int64Array::from(counts)),
    ];

    record_batch(schema, output_name, records)?;
    info!("Recorded {} events to {}", events.len(), output_name);
    Ok(())
}

/// Integer ids keep an integer column unless some id in it is text, in which case every id
/// of the column is written, and read back, as text
fn id_array<'a>(ids: impl Iterator<Item = Option<&'a ExternalId>> + Clone) -> (DataType, ArrayRef) {
    let all_ints = ids.clone().flatten().all(|id| id.as_int().is_some());

    if all_ints {
        let values: Vec<Option<i64>> = ids.map(|id| id.and_then(ExternalId::as_int)).collect();
        (DataType::Int64, Arc::new(Int64Array::from(values)))
    } else {
        let values: Vec<Option<String>> = ids.map(|id| id.map(ExternalId::to_string)).collect();
        (DataType::Utf8, Arc::new(StringArray::from(values)))
    }
}

// Records information in a parquet file
fn record_batch(schema: Schema, file_name: &str, record_vec: Vec<ArrayRef>) -> Result<(), SourceError> {
    let mut buffer = File::create(file_name)?;
    let to_write = RecordBatch::try_new(Arc::new(schema), record_vec)?;

    let mut writer = ArrowWriter::try_new(&mut buffer, to_write.schema(), None)?;
    writer.write(&to_write)?;
    writer.close()?;

    Ok(())
}
