use serde::Serialize;

use super::{Formatter, iso8601, iso8601_timestamp};
use crate::fusion::{FusionOutput, LocationState};

pub struct JsonFormatter;

#[derive(Serialize)]
struct Line<'a, T: Serialize> {
    ts: String,
    kind: &'static str,
    #[serde(flatten)]
    data: &'a T,
}

fn render<T: Serialize>(kind: &'static str, ts: String, data: &T) -> String {
    serde_json::to_string(&Line { ts, kind, data })
        .unwrap_or_else(|e| format!(r#"{{"kind":"{}","error":"{}"}}"#, kind, e))
}

impl Formatter for JsonFormatter {
    fn format_heading(&self, output: &FusionOutput) -> String {
        render("heading", iso8601_timestamp(), output)
    }

    fn format_location(&self, state: &LocationState) -> String {
        render("location", iso8601(state.timestamp), state)
    }
}
