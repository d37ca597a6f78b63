use super::{Formatter, iso8601, iso8601_timestamp, variant_name};
use crate::fusion::{FusionOutput, LocationState};

/// One row per notification; columns not relevant to the row's kind are empty
pub struct CsvFormatter;

impl Formatter for CsvFormatter {
    fn format_heading(&self, output: &FusionOutput) -> String {
        let error = output.error.map_or(String::new(), |e| variant_name(&e));
        format!(
            "{},heading,{:.1},{:.1},{},{},{},,,,,",
            iso8601_timestamp(),
            output.heading,
            output.accuracy,
            output.is_active,
            output.is_calibrated,
            error
        )
    }

    fn format_location(&self, state: &LocationState) -> String {
        format!(
            "{},location,{:.1},{:.1},,,,{:.6},{:.6},{},{},{}",
            iso8601(state.timestamp),
            state.display_heading,
            state.accuracy,
            state.latitude,
            state.longitude,
            variant_name(&state.heading_origin),
            state.compass_heading.map_or(String::new(), |h| format!("{:.1}", h)),
            variant_name(&state.accuracy_class)
        )
    }

    fn header(&self) -> Option<&'static str> {
        Some(
            "ts,kind,heading,accuracy,active,calibrated,error,latitude,longitude,origin,compass_heading,accuracy_class",
        )
    }
}
