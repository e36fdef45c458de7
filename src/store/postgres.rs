//! Postgres-backed directory store. All reads are bounded single-batch
//! projections; the only writes are the two binding columns and `last_seen`.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Row, postgres::PgRow};

use super::models::{
    AnnouncementRow, BlockKind, DayBlockRow, DutyRow, ExcellenceRow, SchoolSettingsRow, Screen,
    StandbyRow,
};
use super::{DirError, DirResult, DirectoryStore};

impl From<sqlx::Error> for DirError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DirError::Unavailable(err.to_string())
            }
            other => DirError::Query(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub async fn connect(database_url: &str) -> DirResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn screen_from_row(row: &PgRow) -> Screen {
    Screen {
        id: row.get("id"),
        school_id: row.get("school_id"),
        name: row.get("name"),
        token: row.get("token"),
        bound_device_id: row.get("bound_device_id"),
        bound_at: row.get("bound_at"),
        is_active: row.get("is_active"),
        last_seen: row.get("last_seen"),
    }
}

const SCREEN_COLUMNS: &str =
    "id, school_id, name, token, bound_device_id, bound_at, is_active, last_seen";

impl DirectoryStore for PgDirectory {
    fn screen_by_token(&self, token: &str) -> BoxFuture<'static, DirResult<Option<Screen>>> {
        let pool = self.pool.clone();
        let token = token.to_string();
        async move {
            let row = sqlx::query(&format!(
                "SELECT {SCREEN_COLUMNS} FROM display_screens WHERE token = $1 AND is_active"
            ))
            .bind(&token)
            .fetch_optional(&pool)
            .await?;
            Ok(row.as_ref().map(screen_from_row))
        }
        .boxed()
    }

    fn screen_by_id(&self, screen_id: i64) -> BoxFuture<'static, DirResult<Option<Screen>>> {
        let pool = self.pool.clone();
        async move {
            let row = sqlx::query(&format!(
                "SELECT {SCREEN_COLUMNS} FROM display_screens WHERE id = $1"
            ))
            .bind(screen_id)
            .fetch_optional(&pool)
            .await?;
            Ok(row.as_ref().map(screen_from_row))
        }
        .boxed()
    }

    fn bind_screen_if_unbound(
        &self,
        screen_id: i64,
        device_id: &str,
    ) -> BoxFuture<'static, DirResult<bool>> {
        let pool = self.pool.clone();
        let device_id = device_id.to_string();
        async move {
            let result = sqlx::query(
                "UPDATE display_screens SET bound_device_id = $1, bound_at = $2 \
                 WHERE id = $3 AND bound_device_id IS NULL",
            )
            .bind(&device_id)
            .bind(Utc::now())
            .bind(screen_id)
            .execute(&pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }
        .boxed()
    }

    fn unbind_screen(&self, screen_id: i64) -> BoxFuture<'static, DirResult<bool>> {
        let pool = self.pool.clone();
        async move {
            let result = sqlx::query(
                "UPDATE display_screens SET bound_device_id = NULL, bound_at = NULL WHERE id = $1",
            )
            .bind(screen_id)
            .execute(&pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }
        .boxed()
    }

    fn touch_screen_seen(&self, screen_id: i64) -> BoxFuture<'static, DirResult<()>> {
        let pool = self.pool.clone();
        async move {
            sqlx::query("UPDATE display_screens SET last_seen = $1 WHERE id = $2")
                .bind(Utc::now())
                .bind(screen_id)
                .execute(&pool)
                .await?;
            Ok(())
        }
        .boxed()
    }

    fn school_settings(
        &self,
        school_id: i64,
    ) -> BoxFuture<'static, DirResult<Option<SchoolSettingsRow>>> {
        let pool = self.pool.clone();
        async move {
            let row = sqlx::query(
                "SELECT school_id, name, logo_url, theme, school_type, display_accent_color, \
                 refresh_interval_sec, standby_scroll_speed, periods_scroll_speed, \
                 featured_panel, ws_enabled \
                 FROM school_settings WHERE school_id = $1",
            )
            .bind(school_id)
            .fetch_optional(&pool)
            .await?;
            Ok(row.map(|row| SchoolSettingsRow {
                school_id: row.get("school_id"),
                name: row.get("name"),
                logo_url: row.get("logo_url"),
                theme: row.get("theme"),
                school_type: row.get("school_type"),
                display_accent_color: row.get("display_accent_color"),
                refresh_interval_sec: row.get("refresh_interval_sec"),
                standby_scroll_speed: row.get("standby_scroll_speed"),
                periods_scroll_speed: row.get("periods_scroll_speed"),
                featured_panel: row.get("featured_panel"),
                ws_enabled: row.get("ws_enabled"),
            }))
        }
        .boxed()
    }

    fn day_blocks(
        &self,
        school_id: i64,
        weekday: u32,
    ) -> BoxFuture<'static, DirResult<Vec<DayBlockRow>>> {
        let pool = self.pool.clone();
        async move {
            let rows = sqlx::query(
                "SELECT kind, index, label, subject, class_name, teacher, starts_at, ends_at \
                 FROM day_blocks \
                 WHERE school_id = $1 AND weekday = $2 AND is_active \
                 ORDER BY starts_at, index",
            )
            .bind(school_id)
            .bind(weekday as i32)
            .fetch_all(&pool)
            .await?;
            Ok(rows
                .into_iter()
                .map(|row| DayBlockRow {
                    kind: if row.get::<String, _>("kind") == "break" {
                        BlockKind::Break
                    } else {
                        BlockKind::Period
                    },
                    index: row.get("index"),
                    label: row.get("label"),
                    subject: row.get("subject"),
                    class_name: row.get("class_name"),
                    teacher: row.get("teacher"),
                    starts_at: row.get("starts_at"),
                    ends_at: row.get("ends_at"),
                })
                .collect())
        }
        .boxed()
    }

    fn standby_for_date(
        &self,
        school_id: i64,
        date: NaiveDate,
    ) -> BoxFuture<'static, DirResult<Vec<StandbyRow>>> {
        let pool = self.pool.clone();
        async move {
            let rows = sqlx::query(
                "SELECT period_index, class_name, subject, teacher FROM standby_assignments \
                 WHERE school_id = $1 AND date = $2 ORDER BY period_index, id LIMIT 50",
            )
            .bind(school_id)
            .bind(date)
            .fetch_all(&pool)
            .await?;
            Ok(rows
                .into_iter()
                .map(|row| StandbyRow {
                    period_index: row.get("period_index"),
                    class_name: row.get("class_name"),
                    subject: row.get("subject"),
                    teacher: row.get("teacher"),
                })
                .collect())
        }
        .boxed()
    }

    fn duty_for_date(
        &self,
        school_id: i64,
        date: NaiveDate,
    ) -> BoxFuture<'static, DirResult<Vec<DutyRow>>> {
        let pool = self.pool.clone();
        async move {
            let rows = sqlx::query(
                "SELECT teacher, duty_type, duty_label, location FROM duty_assignments \
                 WHERE school_id = $1 AND date = $2 AND is_active \
                 ORDER BY priority, id DESC LIMIT 50",
            )
            .bind(school_id)
            .bind(date)
            .fetch_all(&pool)
            .await?;
            Ok(rows
                .into_iter()
                .map(|row| DutyRow {
                    teacher: row.get("teacher"),
                    duty_type: row.get("duty_type"),
                    duty_label: row.get("duty_label"),
                    location: row.get("location"),
                })
                .collect())
        }
        .boxed()
    }

    fn announcements_at(
        &self,
        school_id: i64,
        now: DateTime<FixedOffset>,
    ) -> BoxFuture<'static, DirResult<Vec<AnnouncementRow>>> {
        let pool = self.pool.clone();
        let now: DateTime<Utc> = now.with_timezone(&Utc);
        async move {
            let rows = sqlx::query(
                "SELECT id, title, body FROM announcements \
                 WHERE school_id = $1 AND is_active AND starts_at <= $2 \
                 AND (expires_at IS NULL OR expires_at > $2) \
                 ORDER BY id DESC LIMIT 20",
            )
            .bind(school_id)
            .bind(now)
            .fetch_all(&pool)
            .await?;
            Ok(rows
                .into_iter()
                .map(|row| AnnouncementRow {
                    id: row.get("id"),
                    title: row.get("title"),
                    body: row.get("body"),
                })
                .collect())
        }
        .boxed()
    }

    fn excellence_at(
        &self,
        school_id: i64,
        now: DateTime<FixedOffset>,
    ) -> BoxFuture<'static, DirResult<Vec<ExcellenceRow>>> {
        let pool = self.pool.clone();
        let now: DateTime<Utc> = now.with_timezone(&Utc);
        async move {
            let rows = sqlx::query(
                "SELECT name, reason, image FROM excellence_highlights \
                 WHERE school_id = $1 AND start_at <= $2 \
                 AND (end_at IS NULL OR end_at > $2) \
                 ORDER BY priority DESC, id DESC LIMIT 30",
            )
            .bind(school_id)
            .bind(now)
            .fetch_all(&pool)
            .await?;
            Ok(rows
                .into_iter()
                .map(|row| ExcellenceRow {
                    name: row.get("name"),
                    reason: row.get("reason"),
                    image: row.get("image"),
                })
                .collect())
        }
        .boxed()
    }
}
