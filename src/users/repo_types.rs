use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

time::serde::format_description!(calendar_date, Date, "[year]-[month]-[day]");

/// Account role. `Pending` marks an OAuth user who has not chosen a side yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Seller,
    Pending,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Seller => "seller",
            Role::Pending => "pending",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed expertise vocabulary shared by sellers and jobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Expertise {
    Pastry,
    Vegetarian,
    Italian,
    #[serde(rename = "Meats and fishes", alias = "Meat and fishes")]
    MeatsAndFishes,
    Wines,
}

impl Expertise {
    pub const ALL: [Expertise; 5] = [
        Expertise::Pastry,
        Expertise::Vegetarian,
        Expertise::Italian,
        Expertise::MeatsAndFishes,
        Expertise::Wines,
    ];

    /// Spelling used by older records for `MeatsAndFishes`.
    pub const LEGACY_MEATS: &'static str = "Meat and fishes";

    pub fn as_str(self) -> &'static str {
        match self {
            Expertise::Pastry => "Pastry",
            Expertise::Vegetarian => "Vegetarian",
            Expertise::Italian => "Italian",
            Expertise::MeatsAndFishes => "Meats and fishes",
            Expertise::Wines => "Wines",
        }
    }
}

impl fmt::Display for Expertise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Expertise {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::LEGACY_MEATS {
            return Ok(Expertise::MeatsAndFishes);
        }
        Expertise::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown expertise {s:?}"))
    }
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // None for accounts created through OAuth
    pub role: Role,
    pub external_id: Option<String>,
    pub profile_image: Option<String>,
    pub profile_completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub external_id: Option<String>,
    pub profile_image: Option<String>,
    pub profile_completed: bool,
}

/// Stored card summary. The full number never reaches the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCard {
    pub card_holder: String,
    pub expiry_date: String,
    pub last_four_digits: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub user_id: Uuid,
    pub payment_cards: Vec<PaymentCard>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerRecord {
    pub user_id: Uuid,
    pub credit: f64,
    pub minimum_price: f64,
    pub is_online: bool,
    pub expertise: Vec<Expertise>,
}

impl SellerRecord {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            credit: 0.0,
            minimum_price: 0.0,
            is_online: false,
            expertise: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SellerPatch {
    pub minimum_price: Option<f64>,
    pub is_online: Option<bool>,
    pub expertise: Option<Vec<Expertise>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub name: String,
    pub issuer: String,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Experience {
    pub title: String,
    pub company: String,
    pub description: Option<String>,
    #[serde(with = "calendar_date")]
    pub from: Date,
    #[serde(default, with = "calendar_date::option")]
    pub to: Option<Date>,
    #[serde(default)]
    pub current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: Uuid,
    pub bio: Option<String>,
    pub hourly_rate: Option<f64>,
    pub certificates: Vec<Certificate>,
    pub experiences: Vec<Experience>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub bio: Option<String>,
    pub hourly_rate: Option<f64>,
    pub certificates: Option<Vec<Certificate>>,
    pub experiences: Option<Vec<Experience>>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.bio.is_none()
            && self.hourly_rate.is_none()
            && self.certificates.is_none()
            && self.experiences.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expertise_accepts_legacy_spelling() {
        let parsed: Expertise = serde_json::from_str("\"Meat and fishes\"").unwrap();
        assert_eq!(parsed, Expertise::MeatsAndFishes);
        assert_eq!("Meat and fishes".parse::<Expertise>(), Ok(Expertise::MeatsAndFishes));
        assert_eq!(
            serde_json::to_string(&Expertise::MeatsAndFishes).unwrap(),
            "\"Meats and fishes\""
        );
    }

    #[test]
    fn expertise_rejects_unknown_tag() {
        assert!("Sushi".parse::<Expertise>().is_err());
        assert!(serde_json::from_str::<Expertise>("\"Sushi\"").is_err());
    }

    #[test]
    fn user_serialization_hides_password_hash() {
        let user = User {
            id: Uuid::new_v4(),
            username: "chef".into(),
            full_name: "Chef Example".into(),
            email: "chef@example.com".into(),
            password_hash: Some("$argon2id$secret".into()),
            role: Role::Seller,
            external_id: None,
            profile_image: None,
            profile_completed: true,
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["role"], "seller");
        assert_eq!(json["fullName"], "Chef Example");
    }

    #[test]
    fn experience_dates_use_calendar_format() {
        let exp: Experience = serde_json::from_str(
            r#"{"title":"Sous chef","company":"Bistro","from":"2019-04-01","current":true}"#,
        )
        .unwrap();
        assert_eq!(exp.from, time::macros::date!(2019 - 04 - 01));
        assert_eq!(exp.to, None);
        assert!(exp.current);
    }
}
