use tracing::{info, warn};

use crate::liquidctl::run_capture;
use crate::models::{classify, normalize_name, ClassificationRule, SensorReading};

pub const GPU_DEVICE_NAME: &str = "nvidia_gpu";
const NVIDIA_SMI_COMMAND: &str = "nvidia-smi";
const NVIDIA_SMI_ARGS: &[&str] = &[
    "--query-gpu=temperature.gpu,power.draw",
    "--format=csv,noheader,nounits",
];

/// Query NVIDIA GPUs for temperature and power draw. A machine without
/// nvidia-smi simply contributes no readings; any other failure is logged
/// and the run continues with the liquidctl readings alone.
pub async fn collect(timeout_secs: u64, rules: &[ClassificationRule]) -> Vec<SensorReading> {
    match run_capture(NVIDIA_SMI_COMMAND, NVIDIA_SMI_ARGS, timeout_secs).await {
        Ok(output) => parse_nvidia_smi(&output, rules),
        Err(e) if e.is_not_found() => {
            info!("nvidia-smi not found, assuming no NVIDIA GPUs");
            Vec::new()
        }
        Err(e) => {
            warn!("Failed to query nvidia-smi: {}", e);
            Vec::new()
        }
    }
}

/// Parse `temperature.gpu, power.draw` CSV rows, one row per GPU.
fn parse_nvidia_smi(raw: &str, rules: &[ClassificationRule]) -> Vec<SensorReading> {
    let mut readings = Vec::new();
    for (index, line) in raw.lines().filter(|l| !l.trim().is_empty()).enumerate() {
        let Some((temperature, power)) = line.split_once(',') else {
            warn!("Skipping malformed nvidia-smi line: {:?}", line);
            continue;
        };
        let (Some(temperature), Some(power)) = (parse_field(temperature), parse_field(power))
        else {
            warn!("Skipping malformed nvidia-smi line: {:?}", line);
            continue;
        };
        readings.push(gpu_reading(index, "Temperature", temperature, "°C", rules));
        readings.push(gpu_reading(index, "Power", power, "W", rules));
    }
    readings
}

fn parse_field(raw: &str) -> Option<f64> {
    let value = raw.trim().parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

fn gpu_reading(
    index: usize,
    kind: &str,
    value: f64,
    unit: &str,
    rules: &[ClassificationRule],
) -> SensorReading {
    let label = format!("GPU {} {}", index, kind);
    SensorReading {
        device_name: GPU_DEVICE_NAME.to_string(),
        sensor_type: classify(&label, Some(unit), rules),
        sensor_name: normalize_name(&label),
        original_key: label,
        value,
        unit: Some(unit.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_classification, SensorType};

    #[test]
    fn one_gpu_yields_temperature_and_power() {
        let readings = parse_nvidia_smi("45, 120.50\n", &default_classification());
        assert_eq!(readings.len(), 2);

        assert_eq!(readings[0].device_name, "nvidia_gpu");
        assert_eq!(readings[0].sensor_name, "gpu_0_temperature");
        assert_eq!(readings[0].sensor_type, SensorType::Temperature);
        assert_eq!(readings[0].value, 45.0);
        assert_eq!(readings[0].unit.as_deref(), Some("°C"));

        assert_eq!(readings[1].sensor_name, "gpu_0_power");
        assert_eq!(readings[1].sensor_type, SensorType::Power);
        assert_eq!(readings[1].value, 120.5);
        assert_eq!(readings[1].unit.as_deref(), Some("W"));
    }

    #[test]
    fn each_row_is_its_own_gpu() {
        let readings = parse_nvidia_smi("45, 120.50\n60, 250.00\n", &default_classification());
        assert_eq!(readings.len(), 4);
        assert_eq!(readings[2].sensor_name, "gpu_1_temperature");
        assert_eq!(readings[2].value, 60.0);
        assert_eq!(readings[3].sensor_name, "gpu_1_power");
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let readings =
            parse_nvidia_smi("N/A, 120.50\n45\n\n50, 100.00\n", &default_classification());
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].sensor_name, "gpu_2_temperature");
    }

    #[test]
    fn non_finite_rows_are_skipped() {
        let readings =
            parse_nvidia_smi("inf, 120.50\n45, NaN\n50, 100.00\n", &default_classification());
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].sensor_name, "gpu_2_temperature");
        assert_eq!(readings[0].value, 50.0);
        assert_eq!(readings[1].value, 100.0);
    }
}
