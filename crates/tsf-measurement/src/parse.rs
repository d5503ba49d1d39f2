//! ---
//! tsf_section: "02-measurement-data-model"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Measurement identity, values and metadata resolution."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Resolution of `inputMeasurementKeys` / `outputMeasurements` setting values.

use tracing::trace;
use uuid::Uuid;

use crate::data_source::{DataRow, DataSource};
use crate::filter::{is_filter_expression, FilterExpression};
use crate::key::MeasurementKey;
use crate::measurement::Measurement;
use crate::{MeasurementError, Result};

/// Table consulted for point tag and signal id lookups.
pub const DEFAULT_MEASUREMENT_TABLE: &str = "ActiveMeasurements";

const ID_COLUMN: &str = "ID";
const SIGNAL_ID_COLUMN: &str = "SignalID";
const POINT_TAG_COLUMN: &str = "PointTag";
const ADDER_COLUMN: &str = "Adder";
const MULTIPLIER_COLUMN: &str = "Multiplier";

/// Resolve a list of input keys.
///
/// `value` is either a `FILTER` expression or a `;`-separated list whose items are `source:id`
/// keys, signal UUIDs or point tags. Duplicates are kept; callers sort and dedupe.
pub fn parse_input_measurement_keys(
    data_source: Option<&DataSource>,
    value: &str,
    table: &str,
) -> Result<Vec<MeasurementKey>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Vec::new());
    }

    if is_filter_expression(value) {
        let rows = select(data_source, value)?;
        return rows.iter().map(key_from_row).collect();
    }

    split_items(value)
        .map(|item| resolve_key(data_source, item, table).map(|(key, _)| key))
        .collect()
}

/// Resolve a list of output measurement definitions.
///
/// Items follow the input grammar and may carry `,adder[,multiplier]` suffixes. When the
/// metadata table knows the measurement its signal id, point tag and scaling are used unless
/// overridden inline.
pub fn parse_output_measurements(
    data_source: Option<&DataSource>,
    value: &str,
    table: &str,
) -> Result<Vec<Measurement>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Vec::new());
    }

    if is_filter_expression(value) {
        let rows = select(data_source, value)?;
        return rows.iter().map(measurement_from_row).collect();
    }

    split_items(value)
        .map(|item| {
            let mut parts = item.split(',').map(str::trim);
            let head = parts.next().unwrap_or_default();
            let (key, row) = resolve_key(data_source, head, table)?;
            let mut measurement = match row {
                Some(row) => measurement_from_row(&row)?,
                None => Measurement::definition(key),
            };
            if let Some(adder) = parts.next() {
                measurement.adder = parse_scale(item, adder)?;
            }
            if let Some(multiplier) = parts.next() {
                measurement.multiplier = parse_scale(item, multiplier)?;
            }
            if parts.next().is_some() {
                return Err(MeasurementError::InvalidMeasurement(item.to_owned()));
            }
            Ok(measurement)
        })
        .collect()
}

fn split_items(value: &str) -> impl Iterator<Item = &str> {
    value.split(';').map(str::trim).filter(|item| !item.is_empty())
}

fn select<'a>(data_source: Option<&'a DataSource>, expression: &str) -> Result<Vec<DataRow<'a>>> {
    let data_source =
        data_source.ok_or_else(|| MeasurementError::MissingDataSource(expression.to_owned()))?;
    let filter: FilterExpression = expression.parse()?;
    let rows = data_source.select(&filter)?;
    trace!(table = filter.table(), rows = rows.len(), "filter expression evaluated");
    Ok(rows)
}

/// Resolve one list item to a key, returning the metadata row when one matched.
fn resolve_key<'a>(
    data_source: Option<&'a DataSource>,
    item: &str,
    table: &str,
) -> Result<(MeasurementKey, Option<DataRow<'a>>)> {
    let metadata = data_source.and_then(|source| source.table(table));

    if let Ok(signal_id) = Uuid::parse_str(item) {
        let row = metadata.and_then(|table| {
            table.rows().find(|row| {
                row.text(SIGNAL_ID_COLUMN)
                    .and_then(|raw| Uuid::parse_str(raw).ok())
                    == Some(signal_id)
            })
        });
        return match row {
            Some(row) => Ok((key_from_row(&row)?, Some(row))),
            None => Err(MeasurementError::UnresolvedMeasurement(item.to_owned())),
        };
    }

    if let Ok(key) = item.parse::<MeasurementKey>() {
        let row = metadata.and_then(|table| {
            table.rows().find(|row| {
                row.text(ID_COLUMN)
                    .and_then(|raw| raw.parse::<MeasurementKey>().ok())
                    .as_ref()
                    == Some(&key)
            })
        });
        return Ok((key, row));
    }

    let row = metadata.and_then(|table| {
        table.rows().find(|row| {
            row.text(POINT_TAG_COLUMN)
                .is_some_and(|tag| tag.eq_ignore_ascii_case(item))
        })
    });
    match row {
        Some(row) => Ok((key_from_row(&row)?, Some(row))),
        None => Err(MeasurementError::UnresolvedMeasurement(item.to_owned())),
    }
}

fn key_from_row(row: &DataRow<'_>) -> Result<MeasurementKey> {
    row.table().require_column(ID_COLUMN)?;
    let raw = row.get(ID_COLUMN).to_string();
    raw.parse()
}

fn measurement_from_row(row: &DataRow<'_>) -> Result<Measurement> {
    let mut measurement = Measurement::definition(key_from_row(row)?);
    measurement.signal_id = row
        .text(SIGNAL_ID_COLUMN)
        .and_then(|raw| Uuid::parse_str(raw).ok());
    measurement.tag_name = row.text(POINT_TAG_COLUMN).map(str::to_owned);
    if let Some(adder) = row.get(ADDER_COLUMN).as_f64() {
        measurement.adder = adder;
    }
    if let Some(multiplier) = row.get(MULTIPLIER_COLUMN).as_f64() {
        measurement.multiplier = multiplier;
    }
    Ok(measurement)
}

fn parse_scale(item: &str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|_| MeasurementError::InvalidMeasurement(item.to_owned()))
}
