use super::{Formatter, variant_name};
use crate::fusion::{FusionOutput, LocationState};
use crate::signal_processing::math::heading_to_cardinal;

pub struct TextFormatter {
    verbose: bool,
}

impl TextFormatter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Formatter for TextFormatter {
    fn format_heading(&self, output: &FusionOutput) -> String {
        let status = match (output.is_active, output.is_calibrated) {
            (false, _) => "stopped",
            (true, true) => "calibrated",
            (true, false) => "uncalibrated",
        };
        let mut line = format!(
            "Heading: {:>5.1}° {:<2} accuracy: {:>3.0} [{}]",
            output.heading,
            output.cardinal(),
            output.accuracy,
            status
        );
        if let Some(error) = output.error {
            line.push_str(&format!(" error: {}", error));
        }
        line
    }

    fn format_location(&self, state: &LocationState) -> String {
        if self.verbose {
            let compass = state
                .compass_heading
                .map_or("-".to_string(), |h| format!("{:.1}°", h));
            format!(
                "Fix: {:.6}, {:.6} ±{:.0} m ({}) heading: {:>5.1}° ({}) compass: {} display: {:>5.1}° {}",
                state.latitude,
                state.longitude,
                state.accuracy,
                variant_name(&state.accuracy_class),
                state.heading,
                variant_name(&state.heading_origin),
                compass,
                state.display_heading,
                heading_to_cardinal(state.display_heading)
            )
        } else {
            format!(
                "Fix: {:.6}, {:.6} heading: {:>5.1}° {}",
                state.latitude,
                state.longitude,
                state.display_heading,
                heading_to_cardinal(state.display_heading)
            )
        }
    }
}
