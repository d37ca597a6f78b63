mod csv;
mod json;
mod text;

use chrono::{DateTime, Utc};

use crate::fusion::{FusionOutput, LocationState};

pub use self::csv::CsvFormatter;
pub use self::json::JsonFormatter;
pub use self::text::TextFormatter;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

/// Renders fusion notifications as single lines
pub trait Formatter: Send {
    fn format_heading(&self, output: &FusionOutput) -> String;

    fn format_location(&self, state: &LocationState) -> String;

    fn header(&self) -> Option<&'static str> {
        None
    }
}

pub fn create_formatter(format: OutputFormat, verbose: bool) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter::new(verbose)),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

pub fn iso8601(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub fn iso8601_timestamp() -> String {
    iso8601(Utc::now())
}

/// `snake_case` name of a serde unit variant, as used in the JSON output
fn variant_name<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => name,
        _ => String::new(),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fusion::{AccuracyClass, HeadingOrigin};

    pub fn heading() -> FusionOutput {
        FusionOutput {
            heading: 123.45,
            accuracy: 87.0,
            is_active: true,
            is_calibrated: false,
            error: Some(ErrorKind::ProcessingFailure),
        }
    }

    pub fn location() -> LocationState {
        LocationState {
            latitude: 37.7749,
            longitude: -122.4194,
            heading: 90.0,
            heading_origin: HeadingOrigin::Derived,
            compass_heading: Some(92.5),
            display_heading: 92.5,
            accuracy: 8.0,
            accuracy_class: AccuracyClass::Good,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}
