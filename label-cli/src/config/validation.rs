//! Setting value validation.

use regex::Regex;
use std::sync::LazyLock;

use niimbot::ModelProfile;

static RE_MAC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9A-Fa-f]{2}[:\-]){5}([0-9A-Fa-f]{2})$").unwrap());
static RE_UUID_NO_HYPHEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]{32}$").unwrap());
static RE_UUID_HYPHEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}$")
        .unwrap()
});

/// Validate a setting value. Returns `Ok(())` if valid, or an error message.
pub fn validate_setting(key: &str, value: &str) -> Result<(), String> {
    match key {
        "NIIMBOT_ADDRESS" => {
            if !value.is_empty()
                && !RE_MAC.is_match(value)
                && !RE_UUID_NO_HYPHEN.is_match(value)
                && !RE_UUID_HYPHEN.is_match(value)
            {
                return Err("invalid address format (expected MAC or UUID)".into());
            }
        }
        "NIIMBOT_MODEL" => {
            if ModelProfile::resolve(value).is_err() {
                return Err("must be 'b1' or 'd110'".into());
            }
        }
        "NIIMBOT_DENSITY" => validate_int_range(value, 1, 5)?,
        "NIIMBOT_BLACK_POINT" => {
            let v: f64 = value.parse().map_err(|_| "must be a float")?;
            if !(0.0..=1.0).contains(&v) {
                return Err("must be between 0.0 and 1.0".into());
            }
        }
        "NIIMBOT_CONNECT_TIMEOUT_SECS" | "NIIMBOT_COMPLETION_TIMEOUT_SECS" => {
            validate_int_range(value, 1, 300)?
        }
        "NIIMBOT_SCAN_TIMEOUT_SECS" => validate_int_range(value, 1, 60)?,
        _ => {}
    }
    Ok(())
}

fn validate_int_range(value: &str, min: i64, max: i64) -> Result<(), String> {
    let v: i64 = value.parse().map_err(|_| "must be an integer")?;
    if !(min..=max).contains(&v) {
        return Err(format!("must be between {min} and {max}"));
    }
    Ok(())
}
