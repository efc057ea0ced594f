use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use google_cloud_bigquery::http::table::{TableFieldSchema, TableFieldType, TableSchema};
use google_cloud_bigquery::http::tabledata::list::{Tuple, Value};

/// Storage kind for a result column, derived from the declared BigQuery type.
/// Anything non-scalar (RECORD, REPEATED, and types we don't map) degrades to
/// `Text`, carrying a JSON rendering of the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Real,
    Boolean,
    Timestamp,
}

impl ColumnKind {
    fn from_type(data_type: &TableFieldType) -> Self {
        match data_type {
            TableFieldType::Integer => ColumnKind::Integer,
            TableFieldType::Float | TableFieldType::Numeric => ColumnKind::Real,
            TableFieldType::Boolean => ColumnKind::Boolean,
            TableFieldType::Timestamp => ColumnKind::Timestamp,
            TableFieldType::String => ColumnKind::Text,
            // DATE/TIME/DATETIME arrive as literal strings, RECORDs are
            // rendered to JSON text below.
            _ => ColumnKind::Text,
        }
    }
}

/// One result column: name, storage kind, and sub-columns for RECORD types.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub children: Vec<Column>,
}

impl Column {
    fn from_field(field: &TableFieldSchema) -> Self {
        Column {
            name: field.name.clone(),
            kind: ColumnKind::from_type(&field.data_type),
            children: field
                .fields
                .as_ref()
                .map(|fs| fs.iter().map(Column::from_field).collect())
                .unwrap_or_default(),
        }
    }
}

/// Flatten a result schema into the column list the rest of the pipeline
/// works with.
pub fn columns(schema: &TableSchema) -> Vec<Column> {
    schema.fields.iter().map(Column::from_field).collect()
}

/// A single decoded cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

/// One result row: the columns the remote source returned, in source order,
/// nothing added and nothing dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRecord {
    pub fields: Vec<(String, FieldValue)>,
}

impl RowRecord {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Decode one wire row against the result columns.
pub fn decode_row(columns: &[Column], tuple: &Tuple) -> Result<RowRecord> {
    if tuple.f.len() != columns.len() {
        bail!(
            "row has {} cells but the schema has {} columns",
            tuple.f.len(),
            columns.len()
        );
    }
    let mut fields = Vec::with_capacity(columns.len());
    for (col, cell) in columns.iter().zip(&tuple.f) {
        let value = decode_cell(col, &cell.v)
            .with_context(|| format!("decoding column `{}`", col.name))?;
        fields.push((col.name.clone(), value));
    }
    Ok(RowRecord { fields })
}

fn decode_cell(col: &Column, value: &Value) -> Result<FieldValue> {
    match value {
        Value::Null => Ok(FieldValue::Null),
        Value::String(raw) => decode_scalar(col.kind, raw),
        nested => {
            let rendered = render_json(col, nested);
            Ok(FieldValue::Text(serde_json::to_string(&rendered)?))
        }
    }
}

fn decode_scalar(kind: ColumnKind, raw: &str) -> Result<FieldValue> {
    Ok(match kind {
        ColumnKind::Text => FieldValue::Text(raw.to_string()),
        ColumnKind::Integer => FieldValue::Integer(
            raw.parse()
                .with_context(|| format!("`{raw}` is not an integer"))?,
        ),
        ColumnKind::Real => FieldValue::Real(
            raw.parse()
                .with_context(|| format!("`{raw}` is not a float"))?,
        ),
        ColumnKind::Boolean => {
            if raw.eq_ignore_ascii_case("true") {
                FieldValue::Boolean(true)
            } else if raw.eq_ignore_ascii_case("false") {
                FieldValue::Boolean(false)
            } else {
                bail!("`{raw}` is not a boolean");
            }
        }
        ColumnKind::Timestamp => FieldValue::Timestamp(parse_epoch_seconds(raw)?),
    })
}

/// The REST encoding for TIMESTAMP is fractional epoch seconds, sometimes in
/// scientific notation ("1.7182368E9").
fn parse_epoch_seconds(raw: &str) -> Result<DateTime<Utc>> {
    let secs: f64 = raw
        .parse()
        .with_context(|| format!("`{raw}` is not an epoch timestamp"))?;
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos)
        .ok_or_else(|| anyhow!("timestamp `{raw}` is out of range"))
}

/// Render a RECORD or REPEATED cell as JSON, naming struct members from the
/// column's sub-schema.
fn render_json(col: &Column, value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::String(raw) => match decode_scalar(col.kind, raw) {
            Ok(FieldValue::Integer(i)) => serde_json::Value::from(i),
            Ok(FieldValue::Real(f)) => serde_json::Value::from(f),
            Ok(FieldValue::Boolean(b)) => serde_json::Value::from(b),
            Ok(FieldValue::Timestamp(ts)) => serde_json::Value::from(ts.to_rfc3339()),
            _ => serde_json::Value::from(raw.clone()),
        },
        Value::Array(cells) => serde_json::Value::Array(
            cells.iter().map(|c| render_json(col, &c.v)).collect(),
        ),
        Value::Struct(tuple) => serde_json::Value::Object(
            col.children
                .iter()
                .zip(&tuple.f)
                .map(|(child, cell)| (child.name.clone(), render_json(child, &cell.v)))
                .collect(),
        ),
    }
}
