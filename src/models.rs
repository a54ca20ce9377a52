use serde::{Deserialize, Serialize};

/// Time-of-day a measurement batch was taken. Stored as a small integer
/// (1=morning, 2=day, 3=evening); the display order is fixed regardless of
/// the order rows arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Session {
    Morning,
    Day,
    Evening,
}

impl Session {
    pub const ALL: [Session; 3] = [Session::Morning, Session::Day, Session::Evening];

    pub fn from_code(code: i16) -> Option<Session> {
        match code {
            1 => Some(Session::Morning),
            2 => Some(Session::Day),
            3 => Some(Session::Evening),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Session::Morning => "morning",
            Session::Day => "day",
            Session::Evening => "evening",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlpRow {
    pub individual_number: String,
    pub expedition_id: Option<i32>,
    pub session: i16,
    pub timestamp: i64,
    pub alpha: f64,
    pub beta: f64,
    pub theta: f64,
    pub delta: f64,
    pub smr: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysiologicalRow {
    pub individual_number: String,
    pub expedition_id: Option<i32>,
    pub session: i16,
    pub timestamp: i64,
    pub relax: f64,
    pub fatigue: f64,
    pub concentration: f64,
    pub stress: f64,
    pub involvement: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardioRow {
    pub individual_number: String,
    pub expedition_id: Option<i32>,
    pub session: i16,
    pub timestamp: i64,
    pub heart_rate: f64,
    pub stress_index: f64,
    pub kaplan_index: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductivityRow {
    pub individual_number: String,
    pub expedition_id: Option<i32>,
    pub session: i16,
    pub timestamp: i64,
    pub gravity: f64,
    pub productivity: f64,
    pub fatigue: f64,
    pub concentration: f64,
    pub relaxation: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_codes_round_trip() {
        assert_eq!(Session::from_code(1), Some(Session::Morning));
        assert_eq!(Session::from_code(2), Some(Session::Day));
        assert_eq!(Session::from_code(3), Some(Session::Evening));
        assert_eq!(Session::from_code(0), None);
        assert_eq!(Session::from_code(4), None);
    }

    #[test]
    fn session_order_is_morning_day_evening() {
        let labels: Vec<&str> = Session::ALL.iter().map(|s| s.label()).collect();
        assert_eq!(labels, vec!["morning", "day", "evening"]);
    }
}
