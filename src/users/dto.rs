use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::repo_types::{
    Certificate, ClientRecord, Expertise, Experience, Profile, Role, SellerRecord, User,
};
use crate::jobs::repo_types::Job;

/// Compact user reference embedded in job and conversation views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub profile_image: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            full_name: u.full_name.clone(),
            profile_image: u.profile_image.clone(),
        }
    }
}

/// Card as submitted by the client. Only the last four digits are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardInput {
    pub card_number: String,
    pub card_holder: String,
    pub expiry_date: String,
}

/// Partial profile update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpsertRequest {
    #[serde(alias = "name")]
    pub full_name: Option<String>,
    pub profile_image: Option<String>,
    pub bio: Option<String>,
    pub hourly_rate: Option<f64>,
    pub certificates: Option<Vec<Certificate>>,
    pub experiences: Option<Vec<Experience>>,
    // seller only
    #[serde(default, deserialize_with = "one_or_many")]
    pub expertise: Option<Vec<Expertise>>,
    pub minimum_price: Option<f64>,
    pub is_online: Option<bool>,
    // client only
    #[serde(alias = "paymentMethods")]
    pub payment_cards: Option<Vec<CardInput>>,
}

/// Accepts a single tag or a list of tags.
pub fn one_or_many<'de, D>(de: D) -> Result<Option<Vec<Expertise>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(Expertise),
        Many(Vec<Expertise>),
    }

    Ok(Option::<OneOrMany>::deserialize(de)?.map(|v| match v {
        OneOrMany::One(e) => vec![e],
        OneOrMany::Many(v) => v,
    }))
}

/// Merged view of a user and everything hanging off it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub user: User,
    pub profile: Option<Profile>,
    pub seller: Option<SellerRecord>,
    pub client: Option<ClientRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerDirectoryEntry {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub profile_image: Option<String>,
    pub bio: Option<String>,
    pub hourly_rate: Option<f64>,
    pub expertise: Vec<Expertise>,
    pub minimum_price: f64,
    pub is_online: bool,
}

/// `GET /users/:id`: the user, its role record and its question threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserComposite {
    pub user: User,
    pub role: Role,
    pub client: Option<ClientRecord>,
    pub seller: Option<SellerRecord>,
    pub profile: Option<Profile>,
    pub jobs: Vec<Job>,
}
