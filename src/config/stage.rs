//! Stage-specific environment fields layered on top of [`CommonConfig`]
//! (spec §6): filters read thresholds, the sorter and reducer read a batch
//! cap, the joiner reads two independent barrier counts.

use std::collections::HashMap;

use crate::config::env::parse_field;
use crate::error::PipelineError;

fn collect<T>(errors: Vec<String>, value: T) -> Result<T, PipelineError> {
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(PipelineError::Config(errors.join("; ")))
    }
}

#[derive(Debug, Clone)]
pub struct FilterThresholds {
    pub min_final_amount: Option<f64>,
    pub min_hour: Option<u32>,
    pub max_hour: Option<u32>,
    pub years_to_keep: Option<Vec<i32>>,
}

impl FilterThresholds {
    /// Reads whichever of `MIN_FINAL_AMOUNT` / `MIN_HOUR` / `MAX_HOUR` /
    /// `YEARS_TO_KEEP` are present; a filter worker only sets the ones its
    /// configured predicate needs, so absence is not itself an error here,
    /// only an unparseable present value is.
    pub fn from_env(values: &HashMap<String, String>) -> Result<Self, PipelineError> {
        let mut errors = Vec::new();

        let min_final_amount = values
            .get("MIN_FINAL_AMOUNT")
            .map(|raw| {
                raw.parse::<f64>().map_err(|_| {
                    errors.push(format!("MIN_FINAL_AMOUNT is not a valid number: {raw:?}"))
                })
            })
            .and_then(Result::ok);

        let min_hour = values
            .get("MIN_HOUR")
            .map(|raw| {
                raw.parse::<u32>()
                    .map_err(|_| errors.push(format!("MIN_HOUR is not a valid hour: {raw:?}")))
            })
            .and_then(Result::ok);

        let max_hour = values
            .get("MAX_HOUR")
            .map(|raw| {
                raw.parse::<u32>()
                    .map_err(|_| errors.push(format!("MAX_HOUR is not a valid hour: {raw:?}")))
            })
            .and_then(Result::ok);

        let years_to_keep = values.get("YEARS_TO_KEEP").map(|raw| {
            raw.split(',')
                .filter_map(|part| part.trim().parse::<i32>().ok())
                .collect::<Vec<_>>()
        });

        collect(
            errors,
            Self {
                min_final_amount,
                min_hour,
                max_hour,
                years_to_keep,
            },
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchMaxSize(pub usize);

impl BatchMaxSize {
    pub fn from_env(values: &HashMap<String, String>) -> Result<Self, PipelineError> {
        let mut errors = Vec::new();
        let size = parse_field(values, "BATCH_MAX_SIZE", &mut errors);
        collect(errors, Self(size.unwrap_or(100)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JoinerBarriers {
    pub base_data_prev_controllers_amount: usize,
    pub stream_data_prev_controllers_amount: usize,
}

impl JoinerBarriers {
    pub const NAMES: [&'static str; 2] = [
        "BASE_DATA_PREV_CONTROLLERS_AMOUNT",
        "STREAM_DATA_PREV_CONTROLLERS_AMOUNT",
    ];

    pub fn from_env(values: &HashMap<String, String>) -> Result<Self, PipelineError> {
        let mut errors = Vec::new();
        let base = parse_field(values, "BASE_DATA_PREV_CONTROLLERS_AMOUNT", &mut errors);
        let stream = parse_field(values, "STREAM_DATA_PREV_CONTROLLERS_AMOUNT", &mut errors);
        collect(
            errors,
            Self {
                base_data_prev_controllers_amount: base.unwrap_or(0),
                stream_data_prev_controllers_amount: stream.unwrap_or(0),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn years_to_keep_parses_comma_separated_list() {
        let mut values = HashMap::new();
        values.insert("YEARS_TO_KEEP".to_string(), "2024, 2025".to_string());
        let thresholds = FilterThresholds::from_env(&values).unwrap();
        assert_eq!(thresholds.years_to_keep, Some(vec![2024, 2025]));
    }

    #[test]
    fn batch_max_size_defaults_when_absent() {
        let values = HashMap::new();
        let size = BatchMaxSize::from_env(&values).unwrap();
        assert_eq!(size.0, 100);
    }

    #[test]
    fn joiner_barriers_reads_both_independent_counts() {
        let mut values = HashMap::new();
        values.insert("BASE_DATA_PREV_CONTROLLERS_AMOUNT".to_string(), "2".to_string());
        values.insert("STREAM_DATA_PREV_CONTROLLERS_AMOUNT".to_string(), "3".to_string());
        let barriers = JoinerBarriers::from_env(&values).unwrap();
        assert_eq!(barriers.base_data_prev_controllers_amount, 2);
        assert_eq!(barriers.stream_data_prev_controllers_amount, 3);
    }
}
