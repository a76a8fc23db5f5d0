//! Bundled detection modules

use super::Detector;
use crate::protocol::FuzzRecord;

pub const SPECIAL_CHAR_DETECTION_MODULE: &str = "specialCharDetecModule";

/// Flags a one-argument filter that hands its input back unchanged
///
/// The baseline record carries no arguments and is never flagged.
#[derive(Debug, Default)]
pub struct DifferenceDetector;

impl Detector for DifferenceDetector {
    fn name(&self) -> &str {
        "Difference analyser"
    }

    fn description(&self) -> &str {
        "Analyses replies from a function by checking the difference between the input and the output for a one argument filter."
    }

    fn detect(&self, batch: &[FuzzRecord]) -> Vec<bool> {
        batch
            .iter()
            .map(|record| match &record.args {
                Some(args) => args
                    .first()
                    .is_some_and(|first| *first == record.response.value),
                None => false,
            })
            .collect()
    }

    fn info(&self, _record: &FuzzRecord, result: bool) -> String {
        if result {
            "The filter didn't filter the entry".to_string()
        } else {
            "The filter performed ok".to_string()
        }
    }
}
