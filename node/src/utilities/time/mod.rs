use chrono::{DateTime, TimeZone, Utc};

pub struct ChainTime;

impl ChainTime {
    pub fn now() -> u64 {
        Utc::now().timestamp_millis() as u64
    }

    pub fn from_millis(millis: u64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis as i64)
            .single()
            .unwrap_or_default()
    }
}
