use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::Config;
use crate::models::SensorReading;

pub const TOPIC_ROOT: &str = "liquidctl";
pub const DEFAULT_DEVICE_NAME: &str = "liquid_cooling_system";

/// A ready-to-publish MQTT message.
#[derive(Debug, Clone)]
pub struct SensorMessage {
    pub topic: String,
    pub payload: String,
}

/// Wire form of one reading. Field order is part of the payload format.
#[derive(Serialize)]
struct Payload<'a> {
    timestamp: &'a str,
    sensor_type: &'a str,
    sensor_name: &'a str,
    value: serde_json::Number,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'a str>,
    original_key: &'a str,
}

/// Builds messages for one run. All payloads of a run share a single
/// timestamp taken when the builder is created.
pub struct MessageBuilder {
    timestamp: String,
    units_enabled: bool,
    device_override: Option<String>,
}

impl MessageBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            timestamp: run_timestamp(),
            units_enabled: config.units_enabled,
            device_override: config.device_name_override.clone(),
        }
    }

    pub fn build(&self, reading: &SensorReading) -> Result<SensorMessage, serde_json::Error> {
        let topic = format!(
            "{}/{}/{}/{}",
            TOPIC_ROOT,
            self.device_for(reading),
            reading.sensor_type,
            reading.sensor_name
        );
        let payload = serde_json::to_string(&Payload {
            timestamp: &self.timestamp,
            sensor_type: reading.sensor_type.as_str(),
            sensor_name: &reading.sensor_name,
            value: json_number(reading.value),
            unit: if self.units_enabled {
                reading.unit.as_deref()
            } else {
                None
            },
            original_key: &reading.original_key,
        })?;
        Ok(SensorMessage { topic, payload })
    }

    fn device_for<'a>(&'a self, reading: &'a SensorReading) -> &'a str {
        self.device_override
            .as_deref()
            .or_else(|| (!reading.device_name.is_empty()).then(|| reading.device_name.as_str()))
            .unwrap_or(DEFAULT_DEVICE_NAME)
    }
}

fn run_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Whole values go out as JSON integers, everything else as floats.
fn json_number(value: f64) -> serde_json::Number {
    if value.is_finite()
        && value.fract() == 0.0
        && value >= i64::MIN as f64
        && value <= i64::MAX as f64
    {
        serde_json::Number::from(value as i64)
    } else {
        serde_json::Number::from_f64(value).unwrap_or_else(|| serde_json::Number::from(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{normalize_name, SensorType};

    fn reading(
        device: &str,
        sensor_type: SensorType,
        label: &str,
        value: f64,
        unit: Option<&str>,
    ) -> SensorReading {
        SensorReading {
            device_name: device.to_string(),
            sensor_type,
            sensor_name: normalize_name(label),
            original_key: label.to_string(),
            value,
            unit: unit.map(|u| u.to_string()),
        }
    }

    fn builder(units_enabled: bool, device_override: Option<&str>) -> MessageBuilder {
        MessageBuilder {
            timestamp: "2026-01-02T03:04:05Z".to_string(),
            units_enabled,
            device_override: device_override.map(|d| d.to_string()),
        }
    }

    #[test]
    fn topic_follows_the_root_device_type_name_layout() {
        let b = builder(false, None);
        let msg = b
            .build(&reading(
                "kraken_x73",
                SensorType::Fan,
                "Pump speed",
                1883.0,
                Some("rpm"),
            ))
            .unwrap();
        assert_eq!(msg.topic, "liquidctl/kraken_x73/fan/pump_speed");
    }

    #[test]
    fn device_override_beats_the_detected_name() {
        let b = builder(false, Some("my_loop"));
        let msg = b
            .build(&reading(
                "kraken_x73",
                SensorType::Fan,
                "Pump speed",
                1883.0,
                None,
            ))
            .unwrap();
        assert_eq!(msg.topic, "liquidctl/my_loop/fan/pump_speed");
    }

    #[test]
    fn missing_device_name_falls_back_to_the_default() {
        let b = builder(false, None);
        let msg = b
            .build(&reading("", SensorType::Temperature, "CPU Core", 37.5, None))
            .unwrap();
        assert_eq!(
            msg.topic,
            "liquidctl/liquid_cooling_system/temperature/cpu_core"
        );
    }

    #[test]
    fn unit_appears_only_when_enabled() {
        let r = reading(
            "kraken_x73",
            SensorType::Temperature,
            "Liquid temperature",
            28.9,
            Some("°C"),
        );

        let with_units = builder(true, None).build(&r).unwrap();
        assert!(with_units.payload.contains(r#""unit":"°C""#));

        let without_units = builder(false, None).build(&r).unwrap();
        assert!(!without_units.payload.contains(r#""unit""#));
    }

    #[test]
    fn whole_values_serialize_as_integers() {
        let b = builder(false, None);
        let whole = b
            .build(&reading("d", SensorType::Fan, "Fan speed", 2400.0, None))
            .unwrap();
        assert!(whole.payload.contains(r#""value":2400"#));
        assert!(!whole.payload.contains(r#""value":2400.0"#));

        let fractional = b
            .build(&reading("d", SensorType::Temperature, "CPU", 37.5, None))
            .unwrap();
        assert!(fractional.payload.contains(r#""value":37.5"#));
    }

    #[test]
    fn payload_fields_come_in_a_fixed_order() {
        let b = builder(true, None);
        let msg = b
            .build(&reading(
                "kraken_x73",
                SensorType::Temperature,
                "Liquid temperature",
                28.9,
                Some("°C"),
            ))
            .unwrap();
        let keys = ["timestamp", "sensor_type", "sensor_name", "value", "unit", "original_key"];
        let positions: Vec<usize> = keys
            .iter()
            .map(|k| msg.payload.find(&format!("\"{}\"", k)).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn payload_carries_the_reading_verbatim() {
        let b = builder(true, None);
        let msg = b
            .build(&reading(
                "kraken_x73",
                SensorType::Temperature,
                "Liquid temperature",
                28.9,
                Some("°C"),
            ))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(value["timestamp"], "2026-01-02T03:04:05Z");
        assert_eq!(value["sensor_type"], "temperature");
        assert_eq!(value["sensor_name"], "liquid_temperature");
        assert_eq!(value["value"], 28.9);
        assert_eq!(value["original_key"], "Liquid temperature");
    }

    #[test]
    fn all_messages_of_a_run_share_one_timestamp() {
        let config = Config::from_sources(Default::default(), |_| None).unwrap();
        let b = MessageBuilder::new(&config);
        let first = b
            .build(&reading("d", SensorType::Fan, "Fan A", 1.0, None))
            .unwrap();
        let second = b
            .build(&reading("d", SensorType::Fan, "Fan B", 2.0, None))
            .unwrap();
        let first: serde_json::Value = serde_json::from_str(&first.payload).unwrap();
        let second: serde_json::Value = serde_json::from_str(&second.payload).unwrap();
        assert_eq!(first["timestamp"], second["timestamp"]);
    }
}
