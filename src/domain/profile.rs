//! Per-chat profile aggregate and its pure mutation rules (streak, bounded media history).

use crate::domain::entities::{Direction, MediaTicket};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_LANGUAGE: &str = "es";
pub const DEFAULT_TIER: &str = "free";
/// Entries kept per media direction; oldest dropped first.
pub const DEFAULT_MEDIA_CAP: usize = 200;

/// Day format stored in `streak_last_day`.
const DAY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaHistory {
    #[serde(rename = "in", default)]
    pub inbound: Vec<MediaTicket>,
    #[serde(rename = "out", default)]
    pub outbound: Vec<MediaTicket>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockFlags {
    #[serde(default)]
    pub spam: bool,
    #[serde(default)]
    pub malicious: bool,
    #[serde(default)]
    pub permanent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

impl BlockFlags {
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.permanent || self.until.is_some_and(|u| u > now)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub msg_in: u64,
    #[serde(default)]
    pub msg_out: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_msg_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_msg_id: String,
    #[serde(default)]
    pub streak_days: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub streak_last_day: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Canonical chat id.
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub tier: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub first_seen: DateTime<Utc>,
    pub last_connection: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_chat: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_text: String,
    #[serde(default)]
    pub media: MediaHistory,
    #[serde(default)]
    pub block: BlockFlags,
    #[serde(default)]
    pub metrics: Metrics,
}

impl Profile {
    pub fn new(key: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            name: String::new(),
            language: DEFAULT_LANGUAGE.to_string(),
            tier: DEFAULT_TIER.to_string(),
            tags: HashMap::new(),
            first_seen: now,
            last_connection: now,
            last_chat: None,
            last_text: String::new(),
            media: MediaHistory::default(),
            block: BlockFlags::default(),
            metrics: Metrics::default(),
        }
    }

    /// Applies one inbound message. `today` is the local calendar day of the event.
    pub fn record_inbound(
        &mut self,
        now: DateTime<Utc>,
        today: NaiveDate,
        name: &str,
        message_id: &str,
        text: &str,
    ) {
        if !name.is_empty() {
            self.name = name.to_string();
        }
        self.last_connection = now;
        self.last_chat = Some(now);
        if !text.is_empty() {
            self.last_text = text.to_string();
        }
        self.metrics.msg_in += 1;
        self.metrics.last_msg_at = Some(now);
        if !message_id.is_empty() {
            self.metrics.last_msg_id = message_id.to_string();
        }
        self.advance_streak(today);
    }

    pub fn record_outbound(&mut self, now: DateTime<Utc>) {
        self.metrics.msg_out += 1;
        self.metrics.last_msg_at = Some(now);
        self.last_connection = now;
    }

    /// Same day: unchanged. Previous day: +1. Any other gap (or first message): 1.
    pub fn advance_streak(&mut self, today: NaiveDate) {
        let today_s = today.format(DAY_FORMAT).to_string();
        if self.metrics.streak_last_day == today_s {
            return;
        }
        let last = NaiveDate::parse_from_str(&self.metrics.streak_last_day, DAY_FORMAT).ok();
        let yesterday = today.pred_opt();
        if last.is_some() && last == yesterday {
            self.metrics.streak_days += 1;
        } else {
            self.metrics.streak_days = 1;
        }
        self.metrics.streak_last_day = today_s;
    }

    /// Appends to the history for `direction`, dropping the oldest entries beyond `cap`.
    pub fn push_media(&mut self, direction: Direction, ticket: MediaTicket, cap: usize) {
        let list = match direction {
            Direction::In => &mut self.media.inbound,
            Direction::Out => &mut self.media.outbound,
        };
        list.push(ticket);
        if list.len() > cap {
            let excess = list.len() - cap;
            list.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_streak_consecutive_days() {
        let mut p = Profile::new("1@s.whatsapp.net", Utc::now());
        p.advance_streak(day(2025, 2, 27));
        assert_eq!(p.metrics.streak_days, 1);
        p.advance_streak(day(2025, 2, 28));
        assert_eq!(p.metrics.streak_days, 2);
        // month boundary
        p.advance_streak(day(2025, 3, 1));
        assert_eq!(p.metrics.streak_days, 3);
        assert_eq!(p.metrics.streak_last_day, "2025-03-01");
    }

    #[test]
    fn test_streak_same_day_unchanged() {
        let mut p = Profile::new("1@s.whatsapp.net", Utc::now());
        p.advance_streak(day(2025, 5, 10));
        p.advance_streak(day(2025, 5, 11));
        p.advance_streak(day(2025, 5, 11));
        p.advance_streak(day(2025, 5, 11));
        assert_eq!(p.metrics.streak_days, 2);
    }

    #[test]
    fn test_streak_gap_resets() {
        let mut p = Profile::new("1@s.whatsapp.net", Utc::now());
        p.advance_streak(day(2025, 5, 10));
        p.advance_streak(day(2025, 5, 11));
        p.advance_streak(day(2025, 5, 13));
        assert_eq!(p.metrics.streak_days, 1);
    }

    #[test]
    fn test_record_inbound_updates_metrics() {
        let now = Utc::now();
        let mut p = Profile::new("1@s.whatsapp.net", now);
        p.record_inbound(now, day(2025, 1, 1), "Ana", "M1", "hola");
        p.record_inbound(now, day(2025, 1, 1), "", "M2", "");
        assert_eq!(p.name, "Ana");
        assert_eq!(p.last_text, "hola");
        assert_eq!(p.metrics.msg_in, 2);
        assert_eq!(p.metrics.last_msg_id, "M2");
        assert_eq!(p.language, DEFAULT_LANGUAGE);
        assert_eq!(p.tier, DEFAULT_TIER);
    }

    #[test]
    fn test_media_history_capped() {
        let mut p = Profile::new("1@s.whatsapp.net", Utc::now());
        for i in 0..5 {
            let t = MediaTicket {
                message_id: format!("M{i}"),
                ..Default::default()
            };
            p.push_media(Direction::In, t, 3);
        }
        let ids: Vec<_> = p.media.inbound.iter().map(|t| t.message_id.as_str()).collect();
        assert_eq!(ids, vec!["M2", "M3", "M4"]);
        assert!(p.media.outbound.is_empty());
    }
}
