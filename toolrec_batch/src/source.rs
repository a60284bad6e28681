mod event_writer;

use crate::loader::RawInteraction;
use arrow_schema::ArrowError;
use chrono::{DateTime, Utc};
use parquet::errors::ParquetError;
use polars::prelude::*;
use std::{fs::File, io};
use thiserror::Error;
use toolrec::ExternalId;
use tracing::info;

pub use event_writer::write_events;

pub const USER_COLUMN: &str = "user_id";
pub const ITEM_COLUMN: &str = "item_id";
pub const TIME_COLUMN: &str = "visited_at";
pub const COUNT_COLUMN: &str = "count";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("polars: {0}")]
    Polars(#[from] PolarsError),
    #[error("file: {0}")]
    File(#[from] io::Error),
    #[error("parquet: {0}")]
    Parquet(#[from] ParquetError),
    #[error("arrow: {0}")]
    Arrow(#[from] ArrowError),
    #[error("column {column} has unsupported type {dtype}")]
    UnsupportedColumn { column: &'static str, dtype: String },
}

/// Reads every interaction record from a parquet file.
///
/// Null cells become missing fields, so the loader decides what a bad record costs.
pub fn read_events(path: &str) -> Result<Vec<RawInteraction>, SourceError> {
    let frame = ParquetReader::new(File::open(path)?).finish()?;
    info!("Read {} event rows from {}", frame.height(), path);

    let users = id_column(frame.column(USER_COLUMN)?, USER_COLUMN)?;
    let items = id_column(frame.column(ITEM_COLUMN)?, ITEM_COLUMN)?;
    let times = time_column(frame.column(TIME_COLUMN)?)?;
    let counts = match frame.column(COUNT_COLUMN) {
        Ok(series) => count_column(series)?,
        Err(_) => vec![None; frame.height()],
    };

    let records = users
        .into_iter()
        .zip(items)
        .zip(times)
        .zip(counts)
        .map(|(((user_id, item_id), event_time), count)| RawInteraction {
            user_id,
            item_id,
            event_time,
            count,
        })
        .collect();

    Ok(records)
}

fn id_column(series: &Series, column: &'static str) -> Result<Vec<Option<ExternalId>>, SourceError> {
    let dtype = series.dtype();

    if dtype.is_integer() {
        let cast = series.cast(&DataType::Int64)?;
        return Ok(cast.i64()?.into_iter().map(|v| v.map(ExternalId::Int)).collect());
    }

    match dtype {
        DataType::String => Ok(series
            .str()?
            .into_iter()
            .map(|v| v.map(|text| ExternalId::Text(text.to_owned())))
            .collect()),
        other => Err(SourceError::UnsupportedColumn {
            column,
            dtype: other.to_string(),
        }),
    }
}

fn time_column(series: &Series) -> Result<Vec<Option<DateTime<Utc>>>, SourceError> {
    // Plain integers are epoch milliseconds
    let unit = match series.dtype() {
        DataType::Datetime(unit, _) => *unit,
        dtype if dtype.is_integer() => TimeUnit::Milliseconds,
        other => {
            return Err(SourceError::UnsupportedColumn {
                column: TIME_COLUMN,
                dtype: other.to_string(),
            })
        }
    };

    let cast = series.cast(&DataType::Int64)?;
    Ok(cast
        .i64()?
        .into_iter()
        .map(|v| v.and_then(|v| from_epoch(v, unit)))
        .collect())
}

fn count_column(series: &Series) -> Result<Vec<Option<i64>>, SourceError> {
    if !series.dtype().is_integer() {
        return Err(SourceError::UnsupportedColumn {
            column: COUNT_COLUMN,
            dtype: series.dtype().to_string(),
        });
    }

    let cast = series.cast(&DataType::Int64)?;
    Ok(cast.i64()?.into_iter().collect())
}

fn from_epoch(value: i64, unit: TimeUnit) -> Option<DateTime<Utc>> {
    let per_second = match unit {
        TimeUnit::Nanoseconds => 1_000_000_000,
        TimeUnit::Microseconds => 1_000_000,
        TimeUnit::Milliseconds => 1_000,
    };
    let seconds = value.div_euclid(per_second);
    let nanos = value.rem_euclid(per_second) * (1_000_000_000 / per_second);

    DateTime::from_timestamp(seconds, u32::try_from(nanos).ok()?)
}
