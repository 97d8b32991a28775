//! Field set to [`Smartphone`] conversion

use crate::error::{IngestError, Result};
use crate::source::FieldSet;
use smartbatch_common::Smartphone;

/// Converts one tokenized line into a typed record
pub trait RecordMapper: Send + Sync {
    fn map(&self, fields: &FieldSet) -> Result<Smartphone>;
}

/// Maps the six smartphone columns by name, converting each explicitly
#[derive(Debug, Clone, Copy, Default)]
pub struct SmartphoneMapper;

impl RecordMapper for SmartphoneMapper {
    fn map(&self, fields: &FieldSet) -> Result<Smartphone> {
        Ok(Smartphone {
            brand: text(fields, "brand")?,
            model: text(fields, "model")?,
            operating_system: text(fields, "operating_system")?,
            release_year: integer(fields, "release_year")?,
            screen_size: decimal(fields, "screen_size")?,
            price: non_negative(fields, "price")?,
        })
    }
}

fn raw<'a>(fields: &'a FieldSet, name: &'static str) -> Result<&'a str> {
    fields
        .get(name)
        .ok_or_else(|| mapping_error(fields, name, "field is missing"))
}

fn text(fields: &FieldSet, name: &'static str) -> Result<String> {
    let value = raw(fields, name)?;
    if value.is_empty() {
        return Err(mapping_error(fields, name, "value is blank"));
    }
    Ok(value.to_string())
}

fn integer(fields: &FieldSet, name: &'static str) -> Result<i32> {
    let value = raw(fields, name)?;
    value
        .parse()
        .map_err(|e| mapping_error(fields, name, format!("invalid integer '{}': {}", value, e)))
}

fn decimal(fields: &FieldSet, name: &'static str) -> Result<f64> {
    let value = raw(fields, name)?;
    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Ok(parsed),
        Ok(_) => Err(mapping_error(fields, name, format!("value '{}' is not finite", value))),
        Err(e) => Err(mapping_error(fields, name, format!("invalid decimal '{}': {}", value, e))),
    }
}

fn non_negative(fields: &FieldSet, name: &'static str) -> Result<f64> {
    let value = decimal(fields, name)?;
    if value < 0.0 {
        return Err(mapping_error(fields, name, format!("value {} is negative", value)));
    }
    Ok(value)
}

fn mapping_error(fields: &FieldSet, field: &'static str, message: impl Into<String>) -> IngestError {
    IngestError::Mapping {
        line: fields.line,
        field,
        message: message.into(),
    }
}
