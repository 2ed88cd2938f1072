//! Environment-variable configuration (spec §6): each worker binary reads
//! its own named subset of env vars, collecting every missing or
//! unparseable one before failing, rather than stopping at the first.
//! Generalizes the original's `initializer.init_config(names)`, which
//! returned a dict of the requested keys.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::PipelineError;

/// Reads every name in `names` from the process environment, accumulating
/// every missing key into one error instead of failing on the first.
pub fn load_required_env(names: &[&str]) -> Result<HashMap<String, String>, PipelineError> {
    let mut values = HashMap::with_capacity(names.len());
    let mut missing = Vec::new();

    for &name in names {
        match std::env::var(name) {
            Ok(value) => {
                values.insert(name.to_string(), value);
            }
            Err(_) => missing.push(name.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(PipelineError::Config(format!(
            "missing required environment variables: {}",
            missing.join(", ")
        )));
    }

    Ok(values)
}

/// Parses a value already collected by [`load_required_env`], accumulating
/// a named error rather than panicking on a bad value.
pub fn parse_field<T: FromStr>(
    values: &HashMap<String, String>,
    name: &str,
    errors: &mut Vec<String>,
) -> Option<T> {
    match values.get(name) {
        Some(raw) => match raw.parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                errors.push(format!("{name} is not a valid value: {raw:?}"));
                None
            }
        },
        None => {
            errors.push(format!("missing {name}"));
            None
        }
    }
}

/// Common fields every stage worker and the session router read (spec §6:
/// `LOGGING_LEVEL`, `CONTROLLER_ID`, `RABBITMQ_HOST`,
/// `PREV_CONTROLLERS_AMOUNT`, `NEXT_CONTROLLERS_AMOUNT`).
#[derive(Debug, Clone)]
pub struct CommonConfig {
    pub logging_level: String,
    pub controller_id: u32,
    pub rabbitmq_host: String,
    pub prev_controllers_amount: usize,
    pub next_controllers_amount: usize,
}

impl CommonConfig {
    pub const NAMES: [&'static str; 5] = [
        "LOGGING_LEVEL",
        "CONTROLLER_ID",
        "RABBITMQ_HOST",
        "PREV_CONTROLLERS_AMOUNT",
        "NEXT_CONTROLLERS_AMOUNT",
    ];

    pub fn from_env(values: &HashMap<String, String>) -> Result<Self, PipelineError> {
        let mut errors = Vec::new();
        let logging_level = values.get("LOGGING_LEVEL").cloned();
        let controller_id = parse_field(values, "CONTROLLER_ID", &mut errors);
        let rabbitmq_host = values.get("RABBITMQ_HOST").cloned();
        let prev_controllers_amount =
            parse_field(values, "PREV_CONTROLLERS_AMOUNT", &mut errors);
        let next_controllers_amount =
            parse_field(values, "NEXT_CONTROLLERS_AMOUNT", &mut errors);

        if logging_level.is_none() {
            errors.push("missing LOGGING_LEVEL".to_string());
        }
        if rabbitmq_host.is_none() {
            errors.push("missing RABBITMQ_HOST".to_string());
        }

        if !errors.is_empty() {
            return Err(PipelineError::Config(errors.join("; ")));
        }

        Ok(Self {
            logging_level: logging_level.unwrap(),
            controller_id: controller_id.unwrap(),
            rabbitmq_host: rabbitmq_host.unwrap(),
            prev_controllers_amount: prev_controllers_amount.unwrap(),
            next_controllers_amount: next_controllers_amount.unwrap(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_every_missing_name_at_once() {
        // SAFETY: single-threaded test, no concurrent env mutation.
        unsafe {
            std::env::remove_var("NOT_SET_A");
            std::env::remove_var("NOT_SET_B");
        }
        let err = load_required_env(&["NOT_SET_A", "NOT_SET_B"]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("NOT_SET_A"));
        assert!(message.contains("NOT_SET_B"));
    }

    #[test]
    fn parse_field_collects_message_on_bad_value() {
        let mut values = HashMap::new();
        values.insert("CONTROLLER_ID".to_string(), "not-a-number".to_string());
        let mut errors = Vec::new();
        let parsed: Option<u32> = parse_field(&values, "CONTROLLER_ID", &mut errors);
        assert!(parsed.is_none());
        assert_eq!(errors.len(), 1);
    }
}
