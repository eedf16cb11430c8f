//! App record persistence.
//!
//! Records are keyed by bundle; writing a bundle again replaces the row.
//! List fields are stored as JSON text.

use async_trait::async_trait;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::AppDb;
use crate::Error;
use crate::models::{AppRecord, DeveloperContacts};
use crate::traits::Repository;

const INSERT_SQL: &str = "INSERT OR REPLACE INTO apps (
    bundle, developer_id, developer, title, categories, price, picture,
    screenshots_json, rating, review_count, rating_histogram_json,
    description, short_description, recent_changes, release_date,
    last_update_date, app_size, installs, version, android_version,
    content_rating, developer_email, developer_contacts, privacy_policy,
    scraped_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
          ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)";

fn insert_row(conn: &rusqlite::Connection, app: &AppRecord, scraped_at: &str) -> Result<(), Error> {
    let screenshots = serde_json::to_string(&app.screenshots).map_err(|e| Error::Storage(e.to_string()))?;
    let histogram = serde_json::to_string(&app.rating_histogram).map_err(|e| Error::Storage(e.to_string()))?;

    conn.prepare_cached(INSERT_SQL)?.execute(params![
        &app.bundle,
        &app.developer_id,
        &app.developer,
        &app.title,
        &app.categories,
        &app.price,
        &app.picture,
        screenshots,
        &app.rating,
        &app.review_count,
        histogram,
        &app.description,
        &app.short_description,
        &app.recent_changes,
        &app.release_date,
        &app.last_update_date,
        &app.app_size,
        &app.installs,
        &app.version,
        &app.android_version,
        &app.content_rating,
        &app.developer_contacts.email,
        &app.developer_contacts.contacts,
        &app.privacy_policy,
        scraped_at,
    ])?;
    Ok(())
}

fn decode_list(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}

impl AppDb {
    /// Fetch a stored record by bundle.
    pub async fn get_record(&self, bundle: &str) -> Result<Option<AppRecord>, Error> {
        let bundle = bundle.to_string();
        self.conn
            .call(move |conn| -> Result<Option<AppRecord>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT
                    bundle, developer_id, developer, title, categories, price, picture,
                    screenshots_json, rating, review_count, rating_histogram_json,
                    description, short_description, recent_changes, release_date,
                    last_update_date, app_size, installs, version, android_version,
                    content_rating, developer_email, developer_contacts, privacy_policy
                FROM apps WHERE bundle = ?1",
                )?;

                let result = stmt.query_row(params![bundle], |row| {
                    Ok(AppRecord {
                        bundle: row.get(0)?,
                        developer_id: row.get(1)?,
                        developer: row.get(2)?,
                        title: row.get(3)?,
                        categories: row.get(4)?,
                        price: row.get(5)?,
                        picture: row.get(6)?,
                        screenshots: decode_list(row.get(7)?),
                        rating: row.get(8)?,
                        review_count: row.get(9)?,
                        rating_histogram: decode_list(row.get(10)?),
                        description: row.get(11)?,
                        short_description: row.get(12)?,
                        recent_changes: row.get(13)?,
                        release_date: row.get(14)?,
                        last_update_date: row.get(15)?,
                        app_size: row.get(16)?,
                        installs: row.get(17)?,
                        version: row.get(18)?,
                        android_version: row.get(19)?,
                        content_rating: row.get(20)?,
                        developer_contacts: DeveloperContacts { email: row.get(21)?, contacts: row.get(22)? },
                        privacy_policy: row.get(23)?,
                    })
                });

                match result {
                    Ok(app) => Ok(Some(app)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Number of stored records.
    pub async fn count_records(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM apps", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl Repository for AppDb {
    async fn insert_one(&self, record: &AppRecord) -> Result<(), Error> {
        let record = record.clone();
        let scraped_at = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> { insert_row(conn, &record, &scraped_at) })
            .await
            .map_err(Error::from)
    }

    async fn insert_batch(&self, records: &[AppRecord]) -> Result<(), Error> {
        if records.is_empty() {
            return Ok(());
        }

        let records = records.to_vec();
        let scraped_at = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                for record in &records {
                    insert_row(&tx, record, &scraped_at)?;
                }
                tx.commit()?;
                tracing::debug!(count = records.len(), "inserted batch");
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(bundle: &str) -> AppRecord {
        AppRecord {
            developer_id: "dev-1".into(),
            title: format!("Title of {bundle}"),
            screenshots: vec!["one.png".into(), "two.png".into()],
            rating_histogram: vec!["10".into(), "3".into()],
            developer_contacts: DeveloperContacts { email: "dev@example.com".into(), contacts: "Street 1".into() },
            ..AppRecord::with_bundle(bundle)
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = AppDb::open_in_memory().await.unwrap();
        let app = sample("com.example.one");
        db.insert_one(&app).await.unwrap();

        let stored = db.get_record("com.example.one").await.unwrap().unwrap();
        assert_eq!(stored, app);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = AppDb::open_in_memory().await.unwrap();
        assert!(db.get_record("com.missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_replaces_existing_bundle() {
        let db = AppDb::open_in_memory().await.unwrap();
        db.insert_one(&sample("com.a")).await.unwrap();

        let updated = AppRecord { title: "Renamed".into(), ..sample("com.a") };
        db.insert_one(&updated).await.unwrap();

        assert_eq!(db.count_records().await.unwrap(), 1);
        assert_eq!(db.get_record("com.a").await.unwrap().unwrap().title, "Renamed");
    }

    #[tokio::test]
    async fn test_insert_batch() {
        let db = AppDb::open_in_memory().await.unwrap();
        let batch: Vec<_> = (0..50).map(|i| sample(&format!("com.batch.{i}"))).collect();
        db.insert_batch(&batch).await.unwrap();
        assert_eq!(db.count_records().await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_insert_empty_batch() {
        let db = AppDb::open_in_memory().await.unwrap();
        db.insert_batch(&[]).await.unwrap();
        assert_eq!(db.count_records().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_rolls_back_on_failure() {
        let db = AppDb::open_in_memory().await.unwrap();
        db.conn
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_bad BEFORE INSERT ON apps
                     WHEN NEW.bundle = 'com.bad'
                     BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
                )
            })
            .await
            .unwrap();

        let batch = vec![sample("com.good.1"), sample("com.bad"), sample("com.good.2")];
        assert!(db.insert_batch(&batch).await.is_err());
        assert_eq!(db.count_records().await.unwrap(), 0);
    }
}
