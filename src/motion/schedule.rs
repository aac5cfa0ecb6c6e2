use crate::config::ScheduleConfig;
use crate::error::{Result, WatchpostError};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use chrono_tz::Tz;

/// Weekly operating-hours window gating the motion sampler
#[derive(Debug, Clone)]
pub struct OperatingHours {
    enabled: bool,
    /// Bit 0 = Monday .. bit 6 = Sunday
    weekdays: u8,
    start_minute: u16,
    end_minute: u16,
    timezone: Tz,
}

impl OperatingHours {
    /// Window that is always open
    pub fn always() -> Self {
        Self {
            enabled: false,
            weekdays: 0x7f,
            start_minute: 0,
            end_minute: 1440,
            timezone: Tz::UTC,
        }
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        let timezone = config.timezone.parse::<Tz>().map_err(|e| {
            WatchpostError::configuration(format!(
                "invalid schedule timezone '{}': {}",
                config.timezone, e
            ))
        })?;
        Ok(Self {
            enabled: config.enabled,
            weekdays: config.weekdays & 0x7f,
            start_minute: config.start_minute.min(1440),
            end_minute: config.end_minute.min(1440),
            timezone,
        })
    }

    fn day_enabled(&self, weekday_from_monday: u32) -> bool {
        self.weekdays & (1 << weekday_from_monday) != 0
    }

    /// Whether the window is open at the given instant.
    ///
    /// A start after the end describes an overnight window that belongs to the
    /// weekday on which it started; equal start and end cover the whole day.
    pub fn is_armed_at(&self, at: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }

        let local = at.with_timezone(&self.timezone);
        let minute = (local.hour() * 60 + local.minute()) as u16;
        let today = local.weekday().num_days_from_monday();

        if self.start_minute == self.end_minute {
            return self.day_enabled(today);
        }

        if self.start_minute < self.end_minute {
            return self.day_enabled(today)
                && minute >= self.start_minute
                && minute < self.end_minute;
        }

        if minute >= self.start_minute {
            return self.day_enabled(today);
        }
        if minute < self.end_minute {
            let yesterday = (local - ChronoDuration::days(1))
                .weekday()
                .num_days_from_monday();
            return self.day_enabled(yesterday);
        }
        false
    }

    pub fn is_armed_now(&self) -> bool {
        self.is_armed_at(Utc::now())
    }
}
