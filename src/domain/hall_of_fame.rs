use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HallOfFameEntry {
    #[serde(rename = "video_id")]
    pub id: Uuid,
    #[serde(rename = "user_id")]
    pub owner_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_on: OffsetDateTime,
    pub lat: f64,
    pub lon: f64,
    pub score: i64,
    #[serde(skip_serializing)]
    pub content_key: String,
}

/// The current lowest-ranked Hall-of-Fame entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Incumbent {
    pub id: Uuid,
    pub score: i64,
}

/// What happens to a retiring video with respect to the Hall of Fame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// There is room: insert.
    Admit,
    /// Full, but the candidate beats the lowest entry: evict it and insert.
    Replace { evict: Uuid },
    /// Full and the candidate does not strictly beat the lowest entry.
    Discard,
}

impl Admission {
    pub fn decide(size: i64, limit: i64, lowest: Option<Incumbent>, score: i64) -> Self {
        if limit <= 0 {
            return Self::Discard;
        }
        if size < limit {
            return Self::Admit;
        }
        match lowest {
            Some(lowest) if score > lowest.score => Self::Replace { evict: lowest.id },
            _ => Self::Discard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incumbent(score: i64) -> Incumbent {
        Incumbent {
            id: Uuid::new_v4(),
            score,
        }
    }

    #[test]
    fn admits_while_below_capacity() {
        assert_eq!(Admission::decide(0, 10, None, -5), Admission::Admit);
        assert_eq!(Admission::decide(9, 10, Some(incumbent(100)), -5), Admission::Admit);
    }

    #[test]
    fn replaces_lowest_when_strictly_better() {
        let lowest = incumbent(3);
        assert_eq!(
            Admission::decide(10, 10, Some(lowest), 4),
            Admission::Replace { evict: lowest.id }
        );
    }

    #[test]
    fn ties_are_discarded() {
        assert_eq!(Admission::decide(10, 10, Some(incumbent(3)), 3), Admission::Discard);
        assert_eq!(Admission::decide(10, 10, Some(incumbent(3)), -1), Admission::Discard);
    }

    #[test]
    fn zero_capacity_discards_everything() {
        assert_eq!(Admission::decide(0, 0, None, 1000), Admission::Discard);
    }

    #[test]
    fn simulated_stream_keeps_top_scores() {
        let limit = 10;
        let mut hall: Vec<Incumbent> = Vec::new();
        let mut seen = Vec::new();
        for i in 0..40i64 {
            let signed = if i % 2 == 0 { i } else { -i };
            let score = signed * 7 % 23;
            seen.push(score);
            let lowest = hall.iter().min_by_key(|entry| entry.score).copied();
            match Admission::decide(hall.len() as i64, limit, lowest, score) {
                Admission::Admit => hall.push(incumbent(score)),
                Admission::Replace { evict } => {
                    hall.retain(|entry| entry.id != evict);
                    hall.push(incumbent(score));
                }
                Admission::Discard => {}
            }
            assert!(hall.len() as i64 <= limit);
        }

        let mut kept: Vec<i64> = hall.iter().map(|entry| entry.score).collect();
        kept.sort_unstable_by(|a, b| b.cmp(a));
        seen.sort_unstable_by(|a, b| b.cmp(a));
        seen.truncate(limit as usize);
        assert_eq!(kept, seen);
    }
}
