//! Threshold alerts raised while ingesting readings.

use meter_client::domain::{NewAlert, Reading, Severity};

pub const NOMINAL_VOLTAGE: f64 = 230.0;
pub const VOLTAGE_TOLERANCE: f64 = 0.10;
/// Share of the approved load that raises an early warning.
pub const LOAD_WARNING_RATIO: f64 = 0.90;

/// Alerts for one reading against the household's approved load in kW.
/// Load rules are skipped when no positive approved load is known.
pub fn evaluate(reading: &Reading, approved_load_kw: Option<f64>) -> Vec<NewAlert> {
    let mut alerts = Vec::new();
    let alert = |severity, message: String| NewAlert {
        user_id: Some(reading.user_id.clone()),
        severity,
        message,
    };

    let power_kw = reading.power / 1000.0;
    if let Some(load) = approved_load_kw.filter(|l| *l > 0.0) {
        if power_kw > load {
            alerts.push(alert(
                Severity::High,
                format!("Power draw {power_kw:.2} kW exceeds approved load of {load} kW"),
            ));
        } else if power_kw > load * LOAD_WARNING_RATIO {
            alerts.push(alert(
                Severity::Medium,
                format!("Power draw {power_kw:.2} kW is above 90% of approved load of {load} kW"),
            ));
        }
    }

    let band = NOMINAL_VOLTAGE * VOLTAGE_TOLERANCE;
    let (low, high) = (NOMINAL_VOLTAGE - band, NOMINAL_VOLTAGE + band);
    if (reading.voltage - NOMINAL_VOLTAGE).abs() > band {
        alerts.push(alert(
            Severity::Low,
            format!(
                "Voltage {:.1} V is outside the {low:.0}-{high:.0} V band",
                reading.voltage
            ),
        ));
    }

    alerts
}
