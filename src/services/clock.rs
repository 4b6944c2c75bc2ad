use chrono::Timelike;

/// Display pieces for one clock frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockFace {
    pub hours: String,
    pub minutes: String,
    pub seconds: String,
    /// `" AM"` / `" PM"` in 12-hour mode, empty otherwise
    pub suffix: &'static str,
}

impl ClockFace {
    pub fn time_text(&self) -> String {
        format!("{}:{}:{}", self.hours, self.minutes, self.seconds)
    }
}

pub fn format_time<T: Timelike>(time: &T, use_24_hour: bool) -> ClockFace {
    let (hour, suffix) = if use_24_hour {
        (time.hour(), "")
    } else {
        let (pm, hour12) = time.hour12();
        (hour12, if pm { " PM" } else { " AM" })
    };
    ClockFace {
        hours: format!("{hour:02}"),
        minutes: format!("{:02}", time.minute()),
        seconds: format!("{:02}", time.second()),
        suffix,
    }
}

/// Current local time.
pub fn now(use_24_hour: bool) -> ClockFace {
    format_time(&chrono::Local::now(), use_24_hour)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn afternoon_in_12_hour_mode() {
        let face = format_time(&at(13, 5, 9), false);
        assert_eq!(face.hours, "01");
        assert_eq!(face.suffix, " PM");
        assert_eq!(face.time_text(), "01:05:09");
    }

    #[test]
    fn afternoon_in_24_hour_mode() {
        let face = format_time(&at(13, 5, 9), true);
        assert_eq!(face.hours, "13");
        assert_eq!(face.suffix, "");
        assert_eq!(face.time_text(), "13:05:09");
    }

    #[test]
    fn midnight_and_noon_read_as_twelve() {
        let midnight = format_time(&at(0, 0, 0), false);
        assert_eq!((midnight.hours.as_str(), midnight.suffix), ("12", " AM"));

        let noon = format_time(&at(12, 30, 0), false);
        assert_eq!((noon.hours.as_str(), noon.suffix), ("12", " PM"));

        assert_eq!(format_time(&at(0, 0, 0), true).hours, "00");
    }
}
