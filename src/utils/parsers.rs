use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// Parse a Slurm time limit string into a Duration.
///
/// Supported formats (the ones `sbatch --time` accepts):
/// - `"MM"`: minutes
/// - `"MM:SS"`: minutes:seconds
/// - `"HH:MM:SS"`: hours:minutes:seconds
/// - `"D-HH"`, `"D-HH:MM"`, `"D-HH:MM:SS"`: days-hours[:minutes[:seconds]]
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use llmtunnel::utils::parsers::parse_wall_time;
///
/// assert_eq!(parse_wall_time("30").unwrap(), Duration::from_secs(1800));
/// assert_eq!(parse_wall_time("06:00:00").unwrap(), Duration::from_secs(6 * 3600));
/// assert_eq!(parse_wall_time("1-00:00:00").unwrap(), Duration::from_secs(86400));
/// ```
pub fn parse_wall_time(time_str: &str) -> Result<Duration> {
    let time_str = time_str.trim();
    if time_str.is_empty() {
        return Err(anyhow!("Wall time cannot be empty"));
    }

    if let Some((days, rest)) = time_str.split_once('-') {
        let days = days
            .parse::<u64>()
            .context("Invalid days in D-HH:MM:SS format")?;
        let parts: Vec<&str> = rest.split(':').collect();
        let (hours, minutes, seconds) = match parts.as_slice() {
            [h] => (parse_field(h, "hours")?, 0, 0),
            [h, m] => (parse_field(h, "hours")?, parse_field(m, "minutes")?, 0),
            [h, m, s] => (
                parse_field(h, "hours")?,
                parse_field(m, "minutes")?,
                parse_field(s, "seconds")?,
            ),
            _ => return Err(anyhow!("Invalid wall time '{time_str}'")),
        };
        if hours >= 24 {
            return Err(anyhow!("Hours must be below 24 in D-HH format, got {hours}"));
        }
        return total_duration(days, hours, minutes, seconds)
            .with_context(|| format!("Wall time '{time_str}' is too large"));
    }

    let parts: Vec<&str> = time_str.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [m] => (0, parse_field(m, "minutes")?, 0),
        [m, s] => (0, parse_field(m, "minutes")?, parse_field(s, "seconds")?),
        [h, m, s] => (
            parse_field(h, "hours")?,
            parse_field(m, "minutes")?,
            parse_field(s, "seconds")?,
        ),
        _ => {
            return Err(anyhow!(
                "Invalid wall time '{time_str}'. Expected formats: MM, MM:SS, HH:MM:SS, D-HH:MM:SS"
            ))
        }
    };
    total_duration(0, hours, minutes, seconds)
        .with_context(|| format!("Wall time '{time_str}' is too large"))
}

fn total_duration(days: u64, hours: u64, minutes: u64, seconds: u64) -> Result<Duration> {
    [(days, 86400), (hours, 3600), (minutes, 60), (seconds, 1)]
        .into_iter()
        .try_fold(0u64, |total, (value, unit)| {
            value.checked_mul(unit)?.checked_add(total)
        })
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("seconds overflow u64"))
}

fn parse_field(value: &str, unit: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .with_context(|| format!("Invalid {unit} '{value}' in wall time"))
}

/// Format a Duration the way `sbatch --time` expects it.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use llmtunnel::utils::parsers::format_wall_time;
///
/// assert_eq!(format_wall_time(Duration::from_secs(9045)), "02:30:45");
/// assert_eq!(format_wall_time(Duration::from_secs(90000)), "1-01:00:00");
/// ```
pub fn format_wall_time(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{days}-{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

fn trailing_integer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\s*$").expect("valid regex"))
}

/// Extract the job ID from `sbatch` output such as `"Submitted batch job 12345"`.
///
/// # Examples
///
/// ```
/// use llmtunnel::utils::parsers::extract_job_id;
///
/// assert_eq!(extract_job_id("Submitted batch job 12345\n").as_deref(), Some("12345"));
/// assert_eq!(extract_job_id("sbatch: error: invalid partition"), None);
/// ```
pub fn extract_job_id(output: &str) -> Option<String> {
    trailing_integer()
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wall_time_plain_formats() {
        assert_eq!(parse_wall_time("90").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_wall_time("30:45").unwrap(), Duration::from_secs(1845));
        assert_eq!(
            parse_wall_time("06:00:00").unwrap(),
            Duration::from_secs(21600)
        );
    }

    #[test]
    fn test_parse_wall_time_with_days() {
        assert_eq!(parse_wall_time("1-00:00:00").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_wall_time("2-12").unwrap(), Duration::from_secs(216000));
        assert_eq!(
            parse_wall_time("1-06:30").unwrap(),
            Duration::from_secs(86400 + 6 * 3600 + 1800)
        );
    }

    #[test]
    fn test_parse_wall_time_invalid() {
        assert!(parse_wall_time("").is_err());
        assert!(parse_wall_time("abc").is_err());
        assert!(parse_wall_time("1:2:3:4").is_err());
        assert!(parse_wall_time("x-01:00:00").is_err());
        assert!(parse_wall_time("1-01:00:00:00").is_err());
    }

    #[test]
    fn test_parse_wall_time_overflow_is_an_error() {
        assert!(parse_wall_time("300000000000000-00:00:00").is_err());
        assert!(parse_wall_time("18446744073709551615").is_err());
        assert!(parse_wall_time("5124095576030432:00:00").is_err());
    }

    #[test]
    fn test_parse_wall_time_rejects_day_sized_hours() {
        assert!(parse_wall_time("1-24:00:00").is_err());
        assert!(parse_wall_time("0-23:59:59").is_ok());
    }

    #[test]
    fn test_format_wall_time() {
        assert_eq!(format_wall_time(Duration::from_secs(21600)), "06:00:00");
        assert_eq!(format_wall_time(Duration::from_secs(86400)), "1-00:00:00");
        assert_eq!(format_wall_time(Duration::from_secs(59)), "00:00:59");
    }

    #[test]
    fn test_extract_job_id() {
        assert_eq!(
            extract_job_id("Submitted batch job 12345").as_deref(),
            Some("12345")
        );
        assert_eq!(
            extract_job_id("Submitted batch job 12345 on cluster bouchet\n").as_deref(),
            None
        );
        assert_eq!(extract_job_id("   7  ").as_deref(), Some("7"));
        assert_eq!(extract_job_id(""), None);
        assert_eq!(extract_job_id("no id here"), None);
    }

    #[test]
    fn test_extract_job_id_is_idempotent() {
        let id = extract_job_id("Submitted batch job 987").unwrap();
        assert_eq!(extract_job_id(&id).as_deref(), Some("987"));
    }
}
