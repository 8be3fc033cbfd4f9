//! Contains the data models for API requests and responses.

use crate::scheduler::StepRequest;
use serde::{Deserialize, Deserializer, Serialize};

/// Body returned by every command endpoint on success.
#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct SetTemperatureRequest {
    #[serde(default, deserialize_with = "lenient_number")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct TuningsRequest {
    #[serde(rename = "Kp", default, deserialize_with = "lenient_number")]
    pub kp: Option<f64>,
    #[serde(rename = "Ki", default, deserialize_with = "lenient_number")]
    pub ki: Option<f64>,
    #[serde(rename = "Kd", default, deserialize_with = "lenient_number")]
    pub kd: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

/// Accept a JSON number or a numeric string (form fields are always strings).
/// Anything unparseable, and NaN, comes back as `None`.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<NumberOrText>::deserialize(deserializer)?;
    let number = match value {
        Some(NumberOrText::Number(n)) => Some(n),
        Some(NumberOrText::Text(text)) => text.trim().parse::<f64>().ok(),
        None => None,
    };
    Ok(number.filter(|n| !n.is_nan()))
}

/// `null` (or a missing key) clears the active schedule.
#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    #[serde(default)]
    pub schedule: Option<Vec<StepRequest>>,
}
