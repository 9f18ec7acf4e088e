use chrono::Utc;
use directories::{BaseDirs, ProjectDirs};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::calendar::CalendarDay;
use crate::error::TrackerError;

/// Profile mode for the application (dev or prod)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Dev,
    Prod,
}

impl Profile {
    fn app_name(&self) -> &'static str {
        match self {
            Profile::Dev => "cadence-dev",
            Profile::Prod => "cadence",
        }
    }
}

/// Get the configuration directory path
/// If profile is Dev, uses "cadence-dev" instead of "cadence"
pub fn get_config_dir(profile: Profile) -> Option<PathBuf> {
    ProjectDirs::from("com", "cadence", profile.app_name())
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the data directory path
/// If profile is Dev, uses "cadence-dev" instead of "cadence"
pub fn get_data_dir(profile: Profile) -> Option<PathBuf> {
    ProjectDirs::from("com", "cadence", profile.app_name())
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Expand `~` in a path string to the user's home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Today's calendar day from the system clock.
///
/// Only the command-line layer calls this; the core always receives the
/// reference day as a parameter.
pub fn today() -> CalendarDay {
    CalendarDay::from_timestamp(Utc::now())
}

/// Parse a weekday list such as `mon,wed,fri` into indices (Monday = 0)
pub fn parse_weekdays(input: &str) -> Result<BTreeSet<u8>, TrackerError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| -> Result<u8, TrackerError> {
            let index = match s.to_ascii_lowercase().as_str() {
                "mon" | "monday" => 0,
                "tue" | "tuesday" => 1,
                "wed" | "wednesday" => 2,
                "thu" | "thursday" => 3,
                "fri" | "friday" => 4,
                "sat" | "saturday" => 5,
                "sun" | "sunday" => 6,
                other => other
                    .parse::<u8>()
                    .ok()
                    .filter(|n| *n <= 6)
                    .ok_or_else(|| TrackerError::InvalidInput(format!("Unknown weekday: {}", s)))?,
            };
            Ok(index)
        })
        .collect()
}

/// Parse a day-of-month list such as `1,15,31`
pub fn parse_month_days(input: &str) -> Result<BTreeSet<u32>, TrackerError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .ok()
                .filter(|n| (1..=31).contains(n))
                .ok_or_else(|| TrackerError::InvalidInput(format!("Invalid day of month: {}", s)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekdays_accept_names_and_indices() {
        let days = parse_weekdays("mon, Wed,4").unwrap();
        assert_eq!(days.into_iter().collect::<Vec<_>>(), vec![0, 2, 4]);
        assert!(parse_weekdays("funday").is_err());
        assert!(parse_weekdays("7").is_err());
    }

    #[test]
    fn month_days_are_bounded() {
        assert_eq!(parse_month_days("31,1").unwrap().len(), 2);
        assert!(parse_month_days("0").is_err());
        assert!(parse_month_days("32").is_err());
    }

    #[test]
    fn plain_paths_are_untouched() {
        assert_eq!(expand_path("/tmp/cadence.db"), PathBuf::from("/tmp/cadence.db"));
    }
}
