use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{
    CardInput, ProfileUpsertRequest, ProfileView, SellerDirectoryEntry, UserComposite,
};
use super::repo_types::{PaymentCard, ProfilePatch, Role, SellerPatch, User};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

lazy_static! {
    static ref EXPIRY_RE: Regex = Regex::new(r"^(0[1-9]|1[0-2])/(\d{2}|\d{4})$").unwrap();
}

async fn load_user(state: &AppState, id: Uuid) -> ApiResult<User> {
    state
        .store
        .find_user(id)
        .await?
        .ok_or(ApiError::NotFound("User"))
}

fn non_negative(value: Option<f64>, field: &str) -> ApiResult<()> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(ApiError::validation(format!(
            "{field} must be a non-negative number"
        ))),
        _ => Ok(()),
    }
}

/// Reduces a submitted card to the stored summary. The full number is
/// dropped here.
pub(crate) fn summarize_card(card: &CardInput) -> ApiResult<PaymentCard> {
    let digits: String = card
        .card_number
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();
    if !(12..=19).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::validation("Invalid card number"));
    }
    let expiry = card.expiry_date.trim();
    if !EXPIRY_RE.is_match(expiry) {
        return Err(ApiError::validation("Expiry date must look like MM/YY"));
    }
    let holder = card.card_holder.trim();
    if holder.is_empty() {
        return Err(ApiError::validation("Card holder is required"));
    }
    Ok(PaymentCard {
        card_holder: holder.to_string(),
        expiry_date: expiry.to_string(),
        last_four_digits: digits[digits.len() - 4..].to_string(),
    })
}

async fn profile_view(state: &AppState, user: User, with_cards: bool) -> ApiResult<ProfileView> {
    let profile = state.store.find_profile(user.id).await?;
    let seller = match user.role {
        Role::Seller => state.store.find_seller(user.id).await?,
        _ => None,
    };
    let client = match user.role {
        Role::Client if with_cards => state.store.find_client(user.id).await?,
        _ => None,
    };
    Ok(ProfileView {
        user,
        profile,
        seller,
        client,
    })
}

#[instrument(skip(state))]
pub async fn get_profile(state: &AppState, user_id: Uuid) -> ApiResult<ProfileView> {
    let user = load_user(state, user_id).await?;
    profile_view(state, user, true).await
}

/// Someone else's profile. Stored cards are never included.
#[instrument(skip(state))]
pub async fn public_profile(state: &AppState, user_id: Uuid) -> ApiResult<ProfileView> {
    let user = load_user(state, user_id).await?;
    profile_view(state, user, false).await
}

/// Partial update across user, profile and role records. Seller-only fields
/// from a non-seller (or cards from a non-client) are rejected before any
/// write happens.
#[instrument(skip(state, req))]
pub async fn upsert_profile(
    state: &AppState,
    user_id: Uuid,
    req: ProfileUpsertRequest,
) -> ApiResult<ProfileView> {
    let user = load_user(state, user_id).await?;

    let seller_patch = SellerPatch {
        minimum_price: req.minimum_price,
        is_online: req.is_online,
        expertise: req.expertise,
    };
    let touches_seller = seller_patch.minimum_price.is_some()
        || seller_patch.is_online.is_some()
        || seller_patch.expertise.is_some();
    if touches_seller && user.role != Role::Seller {
        warn!(%user_id, role = %user.role, "seller fields from non-seller");
        return Err(ApiError::validation(
            "expertise, minimumPrice and isOnline are only available to sellers",
        ));
    }
    if req.payment_cards.is_some() && user.role != Role::Client {
        warn!(%user_id, role = %user.role, "payment cards from non-client");
        return Err(ApiError::validation(
            "paymentCards are only available to clients",
        ));
    }

    non_negative(req.hourly_rate, "hourlyRate")?;
    non_negative(seller_patch.minimum_price, "minimumPrice")?;
    let full_name = req.full_name.as_deref().map(str::trim);
    if full_name == Some("") {
        return Err(ApiError::validation("fullName cannot be blank"));
    }
    let cards = req
        .payment_cards
        .as_deref()
        .map(|cards| cards.iter().map(summarize_card).collect::<ApiResult<Vec<_>>>())
        .transpose()?;

    if full_name.is_some() || req.profile_image.is_some() {
        state
            .store
            .update_user_details(user_id, full_name, req.profile_image.as_deref())
            .await?
            .ok_or(ApiError::NotFound("User"))?;
    }

    state
        .store
        .upsert_profile(
            user_id,
            ProfilePatch {
                bio: req.bio,
                hourly_rate: req.hourly_rate,
                certificates: req.certificates,
                experiences: req.experiences,
            },
        )
        .await?;

    if touches_seller {
        state
            .store
            .update_seller(user_id, seller_patch)
            .await?
            .ok_or(ApiError::NotFound("Seller profile"))?;
    }
    if let Some(cards) = cards {
        state
            .store
            .set_client_cards(user_id, cards)
            .await?
            .ok_or(ApiError::NotFound("Client profile"))?;
    }

    info!(%user_id, "profile updated");
    get_profile(state, user_id).await
}

/// Every seller with its directory card, online sellers first.
#[instrument(skip(state))]
pub async fn list_active_sellers(state: &AppState) -> ApiResult<Vec<SellerDirectoryEntry>> {
    let users = state.store.list_users_by_role(Role::Seller).await?;
    let sellers: HashMap<Uuid, _> = state
        .store
        .list_sellers()
        .await?
        .into_iter()
        .map(|s| (s.user_id, s))
        .collect();
    let ids: Vec<Uuid> = users.iter().map(|u| u.id).collect();
    let profiles: HashMap<Uuid, _> = state
        .store
        .find_profiles(&ids)
        .await?
        .into_iter()
        .map(|p| (p.user_id, p))
        .collect();

    let mut entries: Vec<SellerDirectoryEntry> = users
        .into_iter()
        .filter_map(|u| {
            let seller = sellers.get(&u.id)?;
            let profile = profiles.get(&u.id);
            Some(SellerDirectoryEntry {
                id: u.id,
                username: u.username,
                full_name: u.full_name,
                profile_image: u.profile_image,
                bio: profile.and_then(|p| p.bio.clone()),
                hourly_rate: profile.and_then(|p| p.hourly_rate),
                expertise: seller.expertise.clone(),
                minimum_price: seller.minimum_price,
                is_online: seller.is_online,
            })
        })
        .collect();
    entries.sort_by(|a, b| {
        b.is_online
            .cmp(&a.is_online)
            .then_with(|| a.username.cmp(&b.username))
    });
    Ok(entries)
}

/// User plus role record and question threads. Cards are only shown to their
/// owner.
#[instrument(skip(state))]
pub async fn get_user_composite(
    state: &AppState,
    requester: Uuid,
    user_id: Uuid,
) -> ApiResult<UserComposite> {
    let user = load_user(state, user_id).await?;
    let (client, seller, jobs) = match user.role {
        Role::Client => {
            let client = if requester == user_id {
                state.store.find_client(user_id).await?
            } else {
                None
            };
            (client, None, state.store.list_jobs_for_buyer(user_id).await?)
        }
        Role::Seller => (
            None,
            state.store.find_seller(user_id).await?,
            state.store.list_jobs_for_assignee(user_id).await?,
        ),
        Role::Pending => (None, None, Vec::new()),
    };
    let jobs = if requester == user_id {
        jobs
    } else {
        jobs.into_iter().filter(|j| j.visible_to(requester)).collect()
    };
    let profile = state.store.find_profile(user_id).await?;
    Ok(UserComposite {
        role: user.role,
        user,
        client,
        seller,
        profile,
        jobs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{dto::CreateJobRequest, services as jobs, services::tests::user};
    use crate::users::repo_types::{Certificate, Expertise};

    fn card(number: &str) -> CardInput {
        CardInput {
            card_number: number.into(),
            card_holder: "Jane Doe".into(),
            expiry_date: "09/28".into(),
        }
    }

    #[test]
    fn card_summary_keeps_last_four_only() {
        let stored = summarize_card(&card("4111 1111 1111 1234")).unwrap();
        assert_eq!(stored.last_four_digits, "1234");
        assert!(!serde_json::to_string(&stored).unwrap().contains("4111"));
        assert!(summarize_card(&card("12ab")).is_err());
        let mut bad = card("4111111111111111");
        bad.expiry_date = "13/28".into();
        assert!(summarize_card(&bad).is_err());
    }

    #[tokio::test]
    async fn partial_updates_leave_other_fields_alone() {
        let state = AppState::fake();
        let s = user(&state, "chef", Role::Seller).await;

        upsert_profile(
            &state,
            s.id,
            ProfileUpsertRequest {
                bio: Some("Pastry chef".into()),
                hourly_rate: Some(40.0),
                certificates: Some(vec![Certificate {
                    name: "CAP Pâtissier".into(),
                    issuer: "Éducation nationale".into(),
                    year: Some(2015),
                }]),
                expertise: Some(vec![Expertise::Pastry]),
                minimum_price: Some(10.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let view = upsert_profile(
            &state,
            s.id,
            ProfileUpsertRequest {
                full_name: Some("Chef Renamed".into()),
                is_online: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(view.user.full_name, "Chef Renamed");
        let profile = view.profile.unwrap();
        assert_eq!(profile.bio.as_deref(), Some("Pastry chef"));
        assert_eq!(profile.hourly_rate, Some(40.0));
        assert_eq!(profile.certificates.len(), 1);
        let seller = view.seller.unwrap();
        assert!(seller.is_online);
        assert_eq!(seller.minimum_price, 10.0);
        assert_eq!(seller.expertise, vec![Expertise::Pastry]);
    }

    #[tokio::test]
    async fn role_specific_fields_are_enforced() {
        let state = AppState::fake();
        let c = user(&state, "client", Role::Client).await;
        let s = user(&state, "seller", Role::Seller).await;

        let err = upsert_profile(
            &state,
            c.id,
            ProfileUpsertRequest {
                minimum_price: Some(3.0),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = upsert_profile(
            &state,
            s.id,
            ProfileUpsertRequest {
                payment_cards: Some(vec![card("4111111111111111")]),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let view = upsert_profile(
            &state,
            c.id,
            ProfileUpsertRequest {
                payment_cards: Some(vec![card("5500-0000-0000-0004")]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let cards = view.client.unwrap().payment_cards;
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].last_four_digits, "0004");

        assert!(public_profile(&state, c.id).await.unwrap().client.is_none());
    }

    #[tokio::test]
    async fn directory_lists_sellers_online_first() {
        let state = AppState::fake();
        let a = user(&state, "anna", Role::Seller).await;
        let b = user(&state, "bruno", Role::Seller).await;
        user(&state, "client", Role::Client).await;
        upsert_profile(
            &state,
            b.id,
            ProfileUpsertRequest {
                is_online: Some(true),
                bio: Some("Sommelier".into()),
                expertise: Some(vec![Expertise::Wines]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let dir = list_active_sellers(&state).await.unwrap();
        assert_eq!(dir.iter().map(|e| e.id).collect::<Vec<_>>(), vec![b.id, a.id]);
        assert_eq!(dir[0].bio.as_deref(), Some("Sommelier"));
        assert_eq!(dir[0].expertise, vec![Expertise::Wines]);
        assert!(dir[1].bio.is_none());
    }

    #[tokio::test]
    async fn composite_includes_role_record_and_jobs() {
        let state = AppState::fake();
        let c = user(&state, "client", Role::Client).await;
        let s = user(&state, "seller", Role::Seller).await;
        let job = jobs::create_job(
            &state,
            c.id,
            CreateJobRequest {
                title: "Carbonara".into(),
                description: "Cream or not?".into(),
                price: 1.5,
                expertise: Some(vec![Expertise::Italian]),
            },
        )
        .await
        .unwrap()
        .job;
        jobs::assign_job(&state, job.id, s.id, Some("Never cream".into()))
            .await
            .unwrap();

        let own = get_user_composite(&state, c.id, c.id).await.unwrap();
        assert_eq!(own.role, Role::Client);
        assert!(own.client.is_some());
        assert_eq!(own.jobs.len(), 1);

        let seen_by_seller = get_user_composite(&state, s.id, c.id).await.unwrap();
        assert!(seen_by_seller.client.is_none());

        let seller = get_user_composite(&state, c.id, s.id).await.unwrap();
        assert!(seller.seller.is_some());
        assert_eq!(seller.jobs.iter().map(|j| j.id).collect::<Vec<_>>(), vec![job.id]);

        let err = get_user_composite(&state, c.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound("User")));
    }

    #[tokio::test]
    async fn composite_hides_jobs_the_requester_cannot_open() {
        let state = AppState::fake();
        let c = user(&state, "client", Role::Client).await;
        let s = user(&state, "seller", Role::Seller).await;
        let outsider = user(&state, "outsider", Role::Seller).await;
        let post = |title: &str| CreateJobRequest {
            title: title.into(),
            description: "Which wine?".into(),
            price: 2.0,
            expertise: None,
        };
        let taken = jobs::create_job(&state, c.id, post("Taken")).await.unwrap().job;
        let open = jobs::create_job(&state, c.id, post("Open")).await.unwrap().job;
        jobs::assign_job(&state, taken.id, s.id, Some("private answer".into()))
            .await
            .unwrap();

        let ids = |v: &UserComposite| v.jobs.iter().map(|j| j.id).collect::<Vec<_>>();

        let by_outsider = get_user_composite(&state, outsider.id, c.id).await.unwrap();
        assert_eq!(ids(&by_outsider), vec![open.id]);
        assert!(by_outsider.jobs.iter().all(|j| j.answer.is_none()));
        assert!(jobs::get_job(&state, taken.id, outsider.id).await.is_err());

        let by_seller = get_user_composite(&state, s.id, c.id).await.unwrap();
        assert_eq!(by_seller.jobs.len(), 2);

        assert!(get_user_composite(&state, outsider.id, s.id)
            .await
            .unwrap()
            .jobs
            .is_empty());
        assert_eq!(
            ids(&get_user_composite(&state, c.id, s.id).await.unwrap()),
            vec![taken.id]
        );
    }
}
