use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ExpertiseRewrite, Store, StoreError, StoreResult};
use crate::jobs::repo_types::{Job, JobPurge, JobStatus, NewJob};
use crate::messages::repo_types::{Message, NewMessage};
use crate::users::repo_types::{
    Certificate, ClientRecord, Experience, Expertise, NewUser, PaymentCard, Profile, ProfilePatch,
    Role, SellerPatch, SellerRecord, User,
};

const USER_COLUMNS: &str = "id, username, full_name, email, password_hash, role, external_id, \
                            profile_image, profile_completed, created_at";
const JOB_COLUMNS: &str = "id, title, description, buyer_id, seller_id, price, expertise, status, \
                           answer, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, read, job_id, created_at";
const SELLER_COLUMNS: &str = "user_id, credit, minimum_price, is_online, expertise";
const PROFILE_COLUMNS: &str = "user_id, bio, hourly_rate, certificates, experiences, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run migrations")?;
        Ok(())
    }
}

// ---- row types ----

#[derive(FromRow)]
struct SellerRow {
    user_id: Uuid,
    credit: f64,
    minimum_price: f64,
    is_online: bool,
    expertise: Vec<String>,
}

impl TryFrom<SellerRow> for SellerRecord {
    type Error = StoreError;

    fn try_from(r: SellerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: r.user_id,
            credit: r.credit,
            minimum_price: r.minimum_price,
            is_online: r.is_online,
            expertise: parse_expertise(r.expertise)?,
        })
    }
}

#[derive(FromRow)]
struct ClientRow {
    user_id: Uuid,
    payment_cards: Json<Vec<PaymentCard>>,
}

impl From<ClientRow> for ClientRecord {
    fn from(r: ClientRow) -> Self {
        Self {
            user_id: r.user_id,
            payment_cards: r.payment_cards.0,
        }
    }
}

#[derive(FromRow)]
struct ProfileRow {
    user_id: Uuid,
    bio: Option<String>,
    hourly_rate: Option<f64>,
    certificates: Json<Vec<Certificate>>,
    experiences: Json<Vec<Experience>>,
    updated_at: OffsetDateTime,
}

impl From<ProfileRow> for Profile {
    fn from(r: ProfileRow) -> Self {
        Self {
            user_id: r.user_id,
            bio: r.bio,
            hourly_rate: r.hourly_rate,
            certificates: r.certificates.0,
            experiences: r.experiences.0,
            updated_at: r.updated_at,
        }
    }
}

#[derive(FromRow)]
struct JobRow {
    id: Uuid,
    title: String,
    description: String,
    buyer_id: Uuid,
    seller_id: Option<Uuid>,
    price: f64,
    expertise: Vec<String>,
    status: JobStatus,
    answer: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(r: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            title: r.title,
            description: r.description,
            buyer_id: r.buyer_id,
            seller_id: r.seller_id,
            price: r.price,
            expertise: parse_expertise(r.expertise)?,
            status: r.status,
            answer: r.answer,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn parse_expertise(tags: Vec<String>) -> StoreResult<Vec<Expertise>> {
    tags.iter()
        .map(|t| t.parse::<Expertise>().map_err(StoreError::Corrupt))
        .collect()
}

fn expertise_tags(tags: &[Expertise]) -> Vec<String> {
    tags.iter().map(|e| e.as_str().to_string()).collect()
}

fn jobs_from_rows(rows: Vec<JobRow>) -> StoreResult<Vec<Job>> {
    rows.into_iter().map(Job::try_from).collect()
}

/// Maps unique-constraint violations on `users` to `StoreError::Duplicate`.
fn map_unique(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.constraint() {
            Some("users_email_key") => return StoreError::Duplicate("email"),
            Some("users_username_key") => return StoreError::Duplicate("username"),
            Some("users_external_id_key") => return StoreError::Duplicate("external_id"),
            _ => {}
        }
    }
    StoreError::Backend(err)
}

async fn insert_extension(conn: &mut PgConnection, user_id: Uuid, role: Role) -> StoreResult<()> {
    let sql = match role {
        Role::Client => "INSERT INTO clients (user_id) VALUES ($1) ON CONFLICT DO NOTHING",
        Role::Seller => "INSERT INTO sellers (user_id) VALUES ($1) ON CONFLICT DO NOTHING",
        Role::Pending => return Ok(()),
    };
    sqlx::query(sql).bind(user_id).execute(conn).await?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn create_account(&self, new: NewUser) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, full_name, email, password_hash, role,
                               external_id, profile_image, profile_completed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new.username)
        .bind(&new.full_name)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.role)
        .bind(&new.external_id)
        .bind(&new.profile_image)
        .bind(new.profile_completed)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique)?;

        insert_extension(&mut tx, user.id, user.role).await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_external_id(&self, external_id: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn list_users_by_role(&self, role: Role) -> StoreResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role = $1 ORDER BY created_at ASC"
        ))
        .bind(role)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn link_external_id(
        &self,
        user_id: Uuid,
        external_id: &str,
        profile_image: Option<&str>,
    ) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET external_id = $2,
                   profile_image = COALESCE(profile_image, $3)
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(external_id)
        .bind(profile_image)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_unique)?;
        Ok(user)
    }

    async fn complete_profile(
        &self,
        user_id: Uuid,
        username: &str,
        role: Role,
    ) -> StoreResult<Option<User>> {
        let mut tx = self.pool.begin().await?;
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET username = $2, role = $3, profile_completed = TRUE
             WHERE id = $1 AND role = 'pending' AND NOT profile_completed
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(username)
        .bind(role)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_unique)?;

        let Some(user) = user else {
            return Ok(None);
        };
        insert_extension(&mut tx, user.id, role).await?;
        tx.commit().await?;
        Ok(Some(user))
    }

    async fn update_user_details(
        &self,
        user_id: Uuid,
        full_name: Option<&str>,
        profile_image: Option<&str>,
    ) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET full_name = COALESCE($2, full_name),
                   profile_image = COALESCE($3, profile_image)
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(full_name)
        .bind(profile_image)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_client(&self, user_id: Uuid) -> StoreResult<Option<ClientRecord>> {
        let row = sqlx::query_as::<_, ClientRow>(
            "SELECT user_id, payment_cards FROM clients WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ClientRecord::from))
    }

    async fn set_client_cards(
        &self,
        user_id: Uuid,
        cards: Vec<PaymentCard>,
    ) -> StoreResult<Option<ClientRecord>> {
        let row = sqlx::query_as::<_, ClientRow>(
            r#"
            UPDATE clients SET payment_cards = $2
             WHERE user_id = $1
            RETURNING user_id, payment_cards
            "#,
        )
        .bind(user_id)
        .bind(Json(cards))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ClientRecord::from))
    }

    async fn find_seller(&self, user_id: Uuid) -> StoreResult<Option<SellerRecord>> {
        let row = sqlx::query_as::<_, SellerRow>(&format!(
            "SELECT {SELLER_COLUMNS} FROM sellers WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SellerRecord::try_from).transpose()
    }

    async fn list_sellers(&self) -> StoreResult<Vec<SellerRecord>> {
        let rows = sqlx::query_as::<_, SellerRow>(&format!("SELECT {SELLER_COLUMNS} FROM sellers"))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SellerRecord::try_from).collect()
    }

    async fn update_seller(
        &self,
        user_id: Uuid,
        patch: SellerPatch,
    ) -> StoreResult<Option<SellerRecord>> {
        let row = sqlx::query_as::<_, SellerRow>(&format!(
            r#"
            UPDATE sellers
               SET minimum_price = COALESCE($2, minimum_price),
                   is_online = COALESCE($3, is_online),
                   expertise = COALESCE($4, expertise)
             WHERE user_id = $1
            RETURNING {SELLER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(patch.minimum_price)
        .bind(patch.is_online)
        .bind(patch.expertise.as_deref().map(expertise_tags))
        .fetch_optional(&self.pool)
        .await?;
        row.map(SellerRecord::try_from).transpose()
    }

    async fn find_profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Profile::from))
    }

    async fn find_profiles(&self, user_ids: &[Uuid]) -> StoreResult<Vec<Profile>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = ANY($1)"
        ))
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Profile::from).collect())
    }

    async fn upsert_profile(&self, user_id: Uuid, patch: ProfilePatch) -> StoreResult<Profile> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            r#"
            INSERT INTO profiles (user_id, bio, hourly_rate, certificates, experiences)
            VALUES ($1, $2, $3, COALESCE($4, '[]'::jsonb), COALESCE($5, '[]'::jsonb))
            ON CONFLICT (user_id) DO UPDATE
               SET bio = COALESCE($2, profiles.bio),
                   hourly_rate = COALESCE($3, profiles.hourly_rate),
                   certificates = COALESCE($4, profiles.certificates),
                   experiences = COALESCE($5, profiles.experiences),
                   updated_at = now()
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(patch.bio)
        .bind(patch.hourly_rate)
        .bind(patch.certificates.map(Json))
        .bind(patch.experiences.map(Json))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn insert_job(&self, new: NewJob) -> StoreResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO jobs (title, description, buyer_id, price, expertise, status)
            VALUES ($1, $2, $3, $4, $5, 'open')
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.buyer_id)
        .bind(new.price)
        .bind(expertise_tags(&new.expertise))
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn find_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Job::try_from).transpose()
    }

    async fn list_jobs_for_buyer(&self, buyer_id: Uuid) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE buyer_id = $1 ORDER BY created_at DESC"
        ))
        .bind(buyer_id)
        .fetch_all(&self.pool)
        .await?;
        jobs_from_rows(rows)
    }

    async fn list_jobs_for_seller(&self, seller_id: Uuid) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
              FROM jobs
             WHERE seller_id = $1 OR status = 'open'
             ORDER BY created_at DESC
            "#
        ))
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;
        jobs_from_rows(rows)
    }

    async fn list_jobs_for_assignee(&self, seller_id: Uuid) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE seller_id = $1 ORDER BY created_at DESC"
        ))
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;
        jobs_from_rows(rows)
    }

    async fn assign_job(
        &self,
        id: Uuid,
        seller_id: Uuid,
        answer: Option<&str>,
    ) -> StoreResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
               SET seller_id = $2, answer = $3, status = 'assigned', updated_at = now()
             WHERE id = $1 AND status = 'open'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(seller_id)
        .bind(answer)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Job::try_from).transpose()
    }

    async fn complete_job(&self, id: Uuid, buyer_id: Uuid) -> StoreResult<Option<Job>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
               SET status = 'completed', updated_at = now()
             WHERE id = $1 AND buyer_id = $2 AND status = 'assigned'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(buyer_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let job = Job::try_from(row)?;
        if let Some(seller_id) = job.seller_id {
            sqlx::query("UPDATE sellers SET credit = credit + $2 WHERE user_id = $1")
                .bind(seller_id)
                .bind(job.price)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(Some(job))
    }

    async fn insert_message(&self, new: NewMessage) -> StoreResult<Message> {
        let msg = sqlx::query_as::<_, Message>(&format!(
            r#"
            INSERT INTO messages (sender_id, receiver_id, content, job_id)
            VALUES ($1, $2, $3, $4)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(new.sender_id)
        .bind(new.receiver_id)
        .bind(&new.content)
        .bind(new.job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(msg)
    }

    async fn messages_involving(&self, user_id: Uuid) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, Message>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
              FROM messages
             WHERE sender_id = $1 OR receiver_id = $1
             ORDER BY created_at ASC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn thread(&self, a: Uuid, b: Uuid) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, Message>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
              FROM messages
             WHERE (sender_id = $1 AND receiver_id = $2)
                OR (sender_id = $2 AND receiver_id = $1)
             ORDER BY created_at ASC
            "#
        ))
        .bind(a)
        .bind(b)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn job_messages(&self, job_id: Uuid) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE job_id = $1 ORDER BY created_at ASC"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_read(&self, from: Uuid, to: Uuid) -> StoreResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE messages SET read = TRUE
             WHERE sender_id = $1 AND receiver_id = $2 AND read = FALSE
            "#,
        )
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn unread_count(&self, user_id: Uuid) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = $1 AND read = FALSE",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn delete_external_users(&self) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM users WHERE external_id IS NOT NULL")
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn delete_all_users(&self) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM users").execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn delete_jobs(&self, which: JobPurge) -> StoreResult<u64> {
        let sql = match which {
            JobPurge::All => "DELETE FROM jobs",
            JobPurge::Open => "DELETE FROM jobs WHERE status = 'open'",
            JobPurge::Finished => "DELETE FROM jobs WHERE status IN ('completed', 'cancelled')",
        };
        let res = sqlx::query(sql).execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn delete_messages(&self) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM messages").execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn standardize_expertise(&self) -> StoreResult<ExpertiseRewrite> {
        let canonical = expertise_tags(&Expertise::ALL);
        let legacy = Expertise::LEGACY_MEATS;
        let replacement = Expertise::MeatsAndFishes.as_str();

        // Legacy spelling is rewritten, anything else outside the vocabulary is dropped.
        let rewrite = |table: &str| {
            format!(
                r#"
                UPDATE {table}
                   SET expertise = ARRAY(
                       SELECT CASE WHEN t.tag = $2 THEN $3 ELSE t.tag END
                         FROM unnest(expertise) WITH ORDINALITY AS t(tag, pos)
                        WHERE t.tag = ANY($1) OR t.tag = $2
                        ORDER BY t.pos)
                 WHERE NOT (expertise <@ $1)
                "#
            )
        };

        let mut tx = self.pool.begin().await?;
        let sellers = sqlx::query(&rewrite("sellers"))
            .bind(&canonical)
            .bind(legacy)
            .bind(replacement)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let jobs = sqlx::query(&rewrite("jobs"))
            .bind(&canonical)
            .bind(legacy)
            .bind(replacement)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(ExpertiseRewrite { sellers, jobs })
    }
}
