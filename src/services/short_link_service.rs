use crate::entities::{short_link_rules, short_links};
use chrono::{DateTime, Utc};
use rand::Rng;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, ModelTrait, QueryFilter,
    Set, SqlErr,
};
use thiserror::Error;

pub const CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const DEFAULT_CODE_LENGTH: usize = 3;
pub const FALLBACK_CODE_LENGTH: usize = 8;
pub const DEFAULT_MAX_TRIES: usize = 5;

#[derive(Error, Debug)]
pub enum ShortLinkError {
    #[error("Short link not found")]
    NotFound,

    /// The unique index on `code` rejected the insert. Safe to retry.
    #[error("Short code already taken: {0}")]
    CodeCollision(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Registry of short codes pointing at long URLs, with optional expiry and
/// click-limit rules.
pub struct ShortLinkService;

impl ShortLinkService {
    pub fn generate_code(length: usize) -> String {
        let mut rng = rand::thread_rng();
        (0..length)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }

    async fn code_exists<C: ConnectionTrait>(db: &C, code: &str) -> Result<bool, DbErr> {
        Ok(short_links::Entity::find()
            .filter(short_links::Column::Code.eq(code))
            .one(db)
            .await?
            .is_some())
    }

    /// Inserts a link with the given code. A duplicate code comes back as
    /// `CodeCollision`.
    pub async fn create_with_code<C: ConnectionTrait>(
        db: &C,
        code: &str,
        original_url: &str,
    ) -> Result<short_links::Model, ShortLinkError> {
        let link = short_links::ActiveModel {
            code: Set(code.to_string()),
            original_url: Set(original_url.to_string()),
            created_at: Set(Utc::now()),
            clicks: Set(0),
            ..Default::default()
        };

        link.insert(db).await.map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                ShortLinkError::CodeCollision(code.to_string())
            }
            _ => ShortLinkError::Database(e),
        })
    }

    /// Mints a 3-character code, checking up to `max_tries` candidates against
    /// the table. When every candidate is taken a single 8-character code is
    /// inserted without a further check.
    pub async fn create_unique<C: ConnectionTrait>(
        db: &C,
        original_url: &str,
        max_tries: usize,
    ) -> Result<short_links::Model, ShortLinkError> {
        for _ in 0..max_tries {
            let code = Self::generate_code(DEFAULT_CODE_LENGTH);
            if !Self::code_exists(db, &code).await? {
                return Self::create_with_code(db, &code, original_url).await;
            }
            tracing::debug!("Short code {} already taken", code);
        }

        // Not re-checked: the unique index is the only guard here
        let code = Self::generate_code(FALLBACK_CODE_LENGTH);
        tracing::warn!(
            "No free {}-character code after {} tries, using {}",
            DEFAULT_CODE_LENGTH,
            max_tries,
            code
        );
        Self::create_with_code(db, &code, original_url).await
    }

    /// Returns the existing link for `original_url` or mints a new one.
    pub async fn get_or_create<C: ConnectionTrait>(
        db: &C,
        original_url: &str,
    ) -> Result<short_links::Model, ShortLinkError> {
        if let Some(existing) = short_links::Entity::find()
            .filter(short_links::Column::OriginalUrl.eq(original_url))
            .one(db)
            .await?
        {
            return Ok(existing);
        }

        match Self::create_unique(db, original_url, DEFAULT_MAX_TRIES).await {
            Err(ShortLinkError::CodeCollision(code)) => {
                tracing::warn!("Concurrent insert took code {}, retrying", code);
                Self::create_unique(db, original_url, DEFAULT_MAX_TRIES).await
            }
            other => other,
        }
    }

    pub fn rule_blocks(rule: &short_link_rules::Model, clicks: i32, now: DateTime<Utc>) -> bool {
        let expired = rule.expires_at.is_some_and(|at| at <= now);
        let exhausted = rule.max_clicks.is_some_and(|max| clicks >= max);
        expired || exhausted
    }

    /// Looks up a code. Links whose rule has expired or run out of clicks
    /// are reported as `NotFound`.
    pub async fn resolve<C: ConnectionTrait>(
        db: &C,
        code: &str,
    ) -> Result<short_links::Model, ShortLinkError> {
        let link = short_links::Entity::find()
            .filter(short_links::Column::Code.eq(code))
            .one(db)
            .await?
            .ok_or(ShortLinkError::NotFound)?;

        let rule = link.find_related(short_link_rules::Entity).one(db).await?;
        if let Some(rule) = rule {
            if Self::rule_blocks(&rule, link.clicks, Utc::now()) {
                tracing::debug!("Short link {} blocked by its rule", code);
                return Err(ShortLinkError::NotFound);
            }
        }

        Ok(link)
    }

    /// Increments the counter in the database and returns the fresh row.
    pub async fn click<C: ConnectionTrait>(
        db: &C,
        link: &short_links::Model,
    ) -> Result<short_links::Model, ShortLinkError> {
        short_links::Entity::update_many()
            .col_expr(
                short_links::Column::Clicks,
                Expr::col(short_links::Column::Clicks).add(1),
            )
            .filter(short_links::Column::Id.eq(link.id))
            .exec(db)
            .await?;

        short_links::Entity::find_by_id(link.id)
            .one(db)
            .await?
            .ok_or(ShortLinkError::NotFound)
    }

    /// Creates or replaces the single rule attached to a link.
    pub async fn set_rule<C: ConnectionTrait>(
        db: &C,
        short_link_id: i32,
        expires_at: Option<DateTime<Utc>>,
        max_clicks: Option<i32>,
    ) -> Result<short_link_rules::Model, ShortLinkError> {
        short_links::Entity::find_by_id(short_link_id)
            .one(db)
            .await?
            .ok_or(ShortLinkError::NotFound)?;

        let existing = short_link_rules::Entity::find()
            .filter(short_link_rules::Column::ShortLinkId.eq(short_link_id))
            .one(db)
            .await?;

        let rule = match existing {
            Some(rule) => {
                let mut active: short_link_rules::ActiveModel = rule.into();
                active.expires_at = Set(expires_at);
                active.max_clicks = Set(max_clicks);
                active.update(db).await?
            }
            None => {
                short_link_rules::ActiveModel {
                    short_link_id: Set(short_link_id),
                    expires_at: Set(expires_at),
                    max_clicks: Set(max_clicks),
                    created_at: Set(Utc::now()),
                    ..Default::default()
                }
                .insert(db)
                .await?
            }
        };

        Ok(rule)
    }

    pub async fn clear_rule<C: ConnectionTrait>(
        db: &C,
        short_link_id: i32,
    ) -> Result<bool, ShortLinkError> {
        let res = short_link_rules::Entity::delete_many()
            .filter(short_link_rules::Column::ShortLinkId.eq(short_link_id))
            .exec(db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    pub fn material_detail_url(base_url: &str, material_id: i32) -> String {
        format!("{}/material/{}", base_url.trim_end_matches('/'), material_id)
    }

    pub fn short_url(base_url: &str, code: &str) -> String {
        format!("{}/s/{}", base_url.trim_end_matches('/'), code)
    }

    /// Extracts the material id from a detail URL such as
    /// `https://host/material/17` or `/subjects/3/materials/17`.
    pub fn material_id_from_url(target: &str) -> Option<i32> {
        let path = match url::Url::parse(target) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => target
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string(),
        };

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        segments.windows(2).rev().find_map(|pair| match pair {
            ["material" | "materials", id] => id.parse().ok(),
            _ => None,
        })
    }
}
