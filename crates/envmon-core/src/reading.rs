use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TEMPERATURE_RANGE: (f64, f64) = (-50.0, 100.0);
pub const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);

pub const TEMPERATURE_KEY: &str = "temperatura";
pub const HUMIDITY_KEY: &str = "humedad";
pub const PRESSURE_KEY: &str = "presion";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementType {
    #[default]
    Manual,
    Automatic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringReading {
    #[serde(rename = "temperatura")]
    pub temperature: f64,
    #[serde(rename = "humedad")]
    pub humidity: f64,
    #[serde(rename = "observaciones")]
    pub observations: String,
    #[serde(rename = "tipo_medicion")]
    pub measurement_type: MeasurementType,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingDraft {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub observations: String,
    pub measurement_type: MeasurementType,
}

impl ReadingDraft {
    pub fn validate(self, now: DateTime<Utc>) -> Result<MonitoringReading, ValidationError> {
        let temperature = check_range("temperature", self.temperature, TEMPERATURE_RANGE)?;
        let humidity = check_range("humidity", self.humidity, HUMIDITY_RANGE)?;

        Ok(MonitoringReading {
            temperature,
            humidity,
            observations: self.observations,
            measurement_type: self.measurement_type,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}

fn check_range(
    field: &'static str,
    value: Option<f64>,
    (min, max): (f64, f64),
) -> Result<f64, ValidationError> {
    let Some(value) = value else {
        return Err(ValidationError {
            field,
            reason: "value is required".to_string(),
        });
    };

    if !value.is_finite() || value < min || value > max {
        return Err(ValidationError {
            field,
            reason: format!("{value} is outside [{min}, {max}]"),
        });
    }

    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Mock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterReading {
    pub value: f64,
    pub unit: Option<String>,
    pub measured_at: Option<String>,
    pub station: Option<String>,
    pub limit: Option<f64>,
    pub status: Option<String>,
}

impl ParameterReading {
    fn bare(value: f64) -> Self {
        Self {
            value,
            unit: None,
            measured_at: None,
            station: None,
            limit: None,
            status: None,
        }
    }

    fn with_unit(value: f64, unit: &str) -> Self {
        Self {
            unit: Some(unit.to_string()),
            ..Self::bare(value)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireParameter {
    Bare(f64),
    Detailed {
        valor: f64,
        #[serde(default)]
        unidad: Option<String>,
        #[serde(default)]
        fecha: Option<String>,
        #[serde(default)]
        estacion: Option<String>,
        #[serde(default)]
        limite: Option<f64>,
        #[serde(default)]
        estado: Option<String>,
    },
}

impl From<WireParameter> for ParameterReading {
    fn from(wire: WireParameter) -> Self {
        match wire {
            WireParameter::Bare(value) => Self::bare(value),
            WireParameter::Detailed {
                valor,
                unidad,
                fecha,
                estacion,
                limite,
                estado,
            } => Self {
                value: valor,
                unit: unidad,
                measured_at: fecha,
                station: estacion,
                limit: limite,
                status: estado,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestReadings {
    pub source: DataSource,
    pub parameters: BTreeMap<String, ParameterReading>,
}

impl LatestReadings {
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;

        let parameters = object
            .iter()
            .filter_map(|(key, raw)| {
                serde_json::from_value::<WireParameter>(raw.clone())
                    .ok()
                    .map(|wire| (key.clone(), ParameterReading::from(wire)))
            })
            .collect();

        Some(Self {
            source: DataSource::Live,
            parameters,
        })
    }

    pub fn mock() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(TEMPERATURE_KEY.to_string(), ParameterReading::with_unit(24.5, "°C"));
        parameters.insert(HUMIDITY_KEY.to_string(), ParameterReading::with_unit(68.2, "%"));
        parameters.insert(PRESSURE_KEY.to_string(), ParameterReading::with_unit(1013.25, "hPa"));

        Self {
            source: DataSource::Mock,
            parameters,
        }
    }

    pub fn temperature(&self) -> Option<f64> {
        self.value(TEMPERATURE_KEY)
    }

    pub fn humidity(&self) -> Option<f64> {
        self.value(HUMIDITY_KEY)
    }

    pub fn value(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).map(|p| p.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPayload {
    pub labels: Vec<String>,
    pub temperature: Vec<f64>,
    pub humidity: Vec<f64>,
}

impl ChartPayload {
    pub fn mock() -> Self {
        Self {
            labels: ["5h ago", "4h ago", "3h ago", "2h ago", "1h ago", "now"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            temperature: vec![22.5, 23.1, 24.2, 24.8, 25.3, 24.5],
            humidity: vec![65.2, 66.8, 68.1, 67.5, 69.2, 68.2],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub limit: u32,
}

impl HistoryQuery {
    pub const DEFAULT_LIMIT: u32 = 100;

    pub fn last_week(today: NaiveDate) -> Self {
        Self {
            from: today.checked_sub_days(Days::new(7)).unwrap_or(today),
            to: today,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    pub fn to_query_string(&self) -> String {
        format!(
            "fecha_inicio={}&fecha_fin={}&limite={}",
            self.from.format("%Y-%m-%d"),
            self.to.format("%Y-%m-%d"),
            self.limit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid date")
    }

    fn draft(temperature: Option<f64>, humidity: Option<f64>) -> ReadingDraft {
        ReadingDraft {
            temperature,
            humidity,
            ..ReadingDraft::default()
        }
    }

    #[test]
    fn validate_accepts_values_inside_ranges() {
        let reading = draft(Some(25.0), Some(50.0))
            .validate(fixed_now())
            .expect("valid draft");

        assert_eq!(reading.temperature, 25.0);
        assert_eq!(reading.humidity, 50.0);
        assert_eq!(reading.measurement_type, MeasurementType::Manual);
        assert_eq!(reading.timestamp, "2026-03-01T12:00:00.000Z");
    }

    #[test]
    fn validate_accepts_range_boundaries_and_zero() {
        assert!(draft(Some(-50.0), Some(0.0)).validate(fixed_now()).is_ok());
        assert!(draft(Some(100.0), Some(100.0)).validate(fixed_now()).is_ok());
        assert!(draft(Some(0.0), Some(0.0)).validate(fixed_now()).is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_temperature() {
        for t in [-60.0, 150.0, f64::NAN] {
            let err = draft(Some(t), Some(50.0))
                .validate(fixed_now())
                .expect_err("temperature must be rejected");
            assert_eq!(err.field, "temperature");
        }
    }

    #[test]
    fn validate_rejects_missing_or_out_of_range_humidity() {
        let missing = draft(Some(20.0), None).validate(fixed_now()).unwrap_err();
        assert_eq!(missing.field, "humidity");
        assert_eq!(missing.reason, "value is required");

        let high = draft(Some(20.0), Some(100.5)).validate(fixed_now()).unwrap_err();
        assert_eq!(high.field, "humidity");
    }

    #[test]
    fn reading_serializes_with_server_field_names() {
        let reading = ReadingDraft {
            temperature: Some(21.5),
            humidity: Some(40.0),
            observations: "cloudy".to_string(),
            measurement_type: MeasurementType::Automatic,
        }
        .validate(fixed_now())
        .expect("valid draft");

        let value = serde_json::to_value(&reading).expect("serialize");
        assert_eq!(
            value,
            json!({
                "temperatura": 21.5,
                "humedad": 40.0,
                "observaciones": "cloudy",
                "tipo_medicion": "automatic",
                "timestamp": "2026-03-01T12:00:00.000Z"
            })
        );
    }

    #[test]
    fn latest_readings_accept_bare_and_detailed_entries() {
        let body = json!({
            "temperatura": {
                "valor": 24.5,
                "unidad": "°C",
                "fecha": "2026-03-01 11:59:00",
                "estacion": "Roof",
                "limite": 30.0,
                "estado": "normal"
            },
            "humedad": 61.0,
            "timestamp": "2026-03-01T12:00:00Z"
        });

        let latest = LatestReadings::from_json(&body).expect("object body");

        assert_eq!(latest.source, DataSource::Live);
        assert_eq!(latest.temperature(), Some(24.5));
        assert_eq!(latest.humidity(), Some(61.0));
        assert!(!latest.parameters.contains_key("timestamp"));

        let temperature = &latest.parameters[TEMPERATURE_KEY];
        assert_eq!(temperature.station.as_deref(), Some("Roof"));
        assert_eq!(temperature.limit, Some(30.0));

        let humidity = &latest.parameters[HUMIDITY_KEY];
        assert_eq!(humidity.unit, None);
        assert_eq!(humidity.station, None);
    }

    #[test]
    fn mock_readings_carry_units() {
        let mock = LatestReadings::mock();
        assert_eq!(mock.source, DataSource::Mock);
        assert_eq!(mock.parameters[PRESSURE_KEY].value, 1013.25);
        assert_eq!(mock.parameters[HUMIDITY_KEY].unit.as_deref(), Some("%"));
        assert_eq!(mock.parameters[TEMPERATURE_KEY].status, None);
    }

    #[test]
    fn latest_readings_reject_non_object_body() {
        assert!(LatestReadings::from_json(&json!([1, 2, 3])).is_none());
    }

    #[test]
    fn history_query_defaults_to_last_week() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).expect("valid date");
        let query = HistoryQuery::last_week(today);

        assert_eq!(
            query.to_query_string(),
            "fecha_inicio=2026-03-03&fecha_fin=2026-03-10&limite=100"
        );
    }
}
