use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketCategory {
    #[serde(rename = "GA")]
    Ga,
    #[serde(rename = "SEATED")]
    Seated,
    #[serde(rename = "TABLE")]
    Table,
}

impl TicketCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketCategory::Ga => "GA",
            TicketCategory::Seated => "SEATED",
            TicketCategory::Table => "TABLE",
        }
    }

    // Статус из БД валидируем на границе, никаких "неизвестных" категорий дальше
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GA" => Some(TicketCategory::Ga),
            "SEATED" => Some(TicketCategory::Seated),
            "TABLE" => Some(TicketCategory::Table),
            _ => None,
        }
    }

    /// GA продаётся количеством, SEATED/TABLE требуют конкретные ресурсы.
    pub fn needs_resources(&self) -> bool {
        !matches!(self, TicketCategory::Ga)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketType {
    pub id: i64,
    pub event_id: i64,
    pub name: String,
    pub category: TicketCategory,
    pub price_minor: i64,
    pub currency: String,
    pub remaining_quantity: i64,
    pub max_per_order: i64,
    pub sales_start: DateTime<Utc>,
    pub sales_end: DateTime<Utc>,
}

impl TicketType {
    pub fn sales_open_at(&self, now: DateTime<Utc>) -> bool {
        self.sales_start <= now && now <= self.sales_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn category_round_trips_through_storage() {
        for c in [TicketCategory::Ga, TicketCategory::Seated, TicketCategory::Table] {
            assert_eq!(TicketCategory::parse(c.as_str()), Some(c));
        }
        assert_eq!(TicketCategory::parse("VIP"), None);
    }

    #[test]
    fn sales_window_is_inclusive() {
        let now = Utc::now();
        let tt = TicketType {
            id: 1,
            event_id: 1,
            name: "GA".into(),
            category: TicketCategory::Ga,
            price_minor: 5000,
            currency: "KZT".into(),
            remaining_quantity: 10,
            max_per_order: 4,
            sales_start: now - Duration::hours(1),
            sales_end: now + Duration::hours(1),
        };
        assert!(tt.sales_open_at(now));
        assert!(tt.sales_open_at(tt.sales_start));
        assert!(tt.sales_open_at(tt.sales_end));
        assert!(!tt.sales_open_at(tt.sales_end + Duration::seconds(1)));
        assert!(!tt.sales_open_at(tt.sales_start - Duration::seconds(1)));
    }
}
