use tracing::warn;

use crate::models::{classify, normalize_name, ClassificationRule, SensorReading};

/// Box-drawing characters liquidctl uses to indent sensor lines.
const TREE_CHARS: [char; 4] = ['├', '└', '│', '─'];

fn is_tree_char(c: char) -> bool {
    TREE_CHARS.contains(&c)
}

/// Parse the raw stdout of `liquidctl status` into sensor readings.
///
/// Flush-left lines without a numeric token name the device the following
/// readings belong to. Every other non-blank line is expected to carry a
/// label, a value and an optional unit; lines that do not are logged and
/// skipped so one odd line never loses the rest of the report.
pub fn parse_status_output(raw: &str, rules: &[ClassificationRule]) -> Vec<SensorReading> {
    let mut readings = Vec::new();
    let mut current_device = String::new();

    for line in raw.lines() {
        let cleaned = line.trim_matches(|c: char| c.is_whitespace() || is_tree_char(c));
        if cleaned.is_empty() {
            continue;
        }

        let tokens: Vec<&str> = cleaned.split_whitespace().collect();
        // The value is the last numeric token; labels like "Fan 1 speed"
        // keep their own digits.
        let numeric = tokens
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, token)| parse_value(token).map(|value| (i, value)));

        let flush_left = !line.starts_with(|c: char| c.is_whitespace() || is_tree_char(c));

        match numeric {
            None if flush_left => {
                current_device = normalize_name(cleaned);
            }
            None => {
                warn!("Skipping unparseable status line: {:?}", cleaned);
            }
            Some((0, _)) => {
                warn!("Skipping status line without a label: {:?}", cleaned);
            }
            Some((idx, value)) => {
                let label = tokens[..idx].join(" ");
                let unit = match tokens[idx + 1..].join(" ") {
                    u if u.is_empty() => None,
                    u => Some(u),
                };
                readings.push(SensorReading {
                    device_name: current_device.clone(),
                    sensor_type: classify(&label, unit.as_deref(), rules),
                    sensor_name: normalize_name(&label),
                    original_key: label,
                    value,
                    unit,
                });
            }
        }
    }

    readings
}

fn parse_value(token: &str) -> Option<f64> {
    let value = token.parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}
