//! Record store operations on the `domains` and `data` tables.
//!
//! Every write is an upsert keyed by `(domain, ip, hostname)`. Rows only ever
//! gain information: a bare hostname or IP row is promoted when the matching
//! full pair arrives, and `headers` is set once and never cleared.

use robot_core::DiscoveryRecord;
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::collections::BTreeSet;

/// What an upsert batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    /// New rows
    pub inserted: usize,
    /// Existing rows that gained an IP, hostname or headers
    pub updated: usize,
    /// Records already fully known
    pub unchanged: usize,
}

impl UpsertStats {
    fn record(&mut self, change: Change) {
        match change {
            Change::Inserted => self.inserted += 1,
            Change::Updated => self.updated += 1,
            Change::Unchanged => self.unchanged += 1,
        }
    }

    /// Add another batch's counts.
    pub fn absorb(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Inserted,
    Updated,
    Unchanged,
}

/// The one known half of a bare record.
#[derive(Debug, Clone, Copy)]
enum Half<'a> {
    Hostname(&'a str),
    Ip(&'a str),
}

impl Half<'_> {
    fn column(self) -> &'static str {
        match self {
            Self::Hostname(_) => "hostname",
            Self::Ip(_) => "ip",
        }
    }

    fn text(&self) -> &str {
        match self {
            Self::Hostname(v) | Self::Ip(v) => v,
        }
    }
}

/// Upsert `records` into `domain` on one connection, normally inside a
/// transaction. The `domain` field of each record is ignored.
pub(crate) async fn upsert_batch(
    conn: &mut SqliteConnection,
    domain: &str,
    records: &[DiscoveryRecord],
) -> Result<UpsertStats, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO domains (domain) VALUES (?)")
        .bind(domain)
        .execute(&mut *conn)
        .await?;

    let mut stats = UpsertStats::default();
    for record in records {
        let headers = record.headers.as_deref();
        let change = match (record.ip.as_deref(), record.hostname.as_deref()) {
            (Some(ip), Some(hostname)) => upsert_pair(conn, domain, ip, hostname, headers).await?,
            (None, Some(hostname)) => upsert_half(conn, domain, Half::Hostname(hostname), headers).await?,
            (Some(ip), None) => upsert_half(conn, domain, Half::Ip(ip), headers).await?,
            (None, None) => Change::Unchanged,
        };
        stats.record(change);
    }
    Ok(stats)
}

async fn upsert_pair(
    conn: &mut SqliteConnection,
    domain: &str,
    ip: &str,
    hostname: &str,
    headers: Option<&str>,
) -> Result<Change, sqlx::Error> {
    let existing: Option<(i64, Option<String>)> = sqlx::query_as(
        "SELECT rowid, headers FROM data WHERE domain = ? AND ip = ? AND hostname = ?",
    )
    .bind(domain)
    .bind(ip)
    .bind(hostname)
    .fetch_optional(&mut *conn)
    .await?;

    let bare: Vec<(i64, Option<String>)> = sqlx::query_as(
        "SELECT rowid, headers FROM data
         WHERE domain = ?
           AND ((ip IS NULL AND hostname = ?) OR (hostname IS NULL AND ip = ?))
         ORDER BY rowid",
    )
    .bind(domain)
    .bind(hostname)
    .bind(ip)
    .fetch_all(&mut *conn)
    .await?;

    let known_headers = existing
        .as_ref()
        .and_then(|(_, h)| h.clone())
        .or_else(|| bare.iter().find_map(|(_, h)| h.clone()))
        .or_else(|| headers.map(str::to_string));

    match existing {
        Some((rowid, current)) => {
            let mut changed = delete_rows(conn, bare.iter().map(|(id, _)| *id)).await? > 0;
            if current.is_none() && known_headers.is_some() {
                sqlx::query("UPDATE data SET headers = ? WHERE rowid = ?")
                    .bind(&known_headers)
                    .bind(rowid)
                    .execute(&mut *conn)
                    .await?;
                changed = true;
            }
            Ok(if changed { Change::Updated } else { Change::Unchanged })
        }
        None => match bare.split_first() {
            Some(((rowid, _), rest)) => {
                delete_rows(conn, rest.iter().map(|(id, _)| *id)).await?;
                sqlx::query("UPDATE data SET ip = ?, hostname = ?, headers = ? WHERE rowid = ?")
                    .bind(ip)
                    .bind(hostname)
                    .bind(&known_headers)
                    .bind(rowid)
                    .execute(&mut *conn)
                    .await?;
                Ok(Change::Updated)
            }
            None => {
                sqlx::query("INSERT INTO data (ip, hostname, headers, domain) VALUES (?, ?, ?, ?)")
                    .bind(ip)
                    .bind(hostname)
                    .bind(&known_headers)
                    .bind(domain)
                    .execute(&mut *conn)
                    .await?;
                Ok(Change::Inserted)
            }
        },
    }
}

async fn upsert_half(
    conn: &mut SqliteConnection,
    domain: &str,
    half: Half<'_>,
    headers: Option<&str>,
) -> Result<Change, sqlx::Error> {
    let column = half.column();

    let matches: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM data WHERE domain = ? AND {column} = ?"))
            .bind(domain)
            .bind(half.text())
            .fetch_one(&mut *conn)
            .await?;

    if matches == 0 {
        let (ip, hostname) = match half {
            Half::Hostname(h) => (None, Some(h)),
            Half::Ip(i) => (Some(i), None),
        };
        sqlx::query("INSERT INTO data (ip, hostname, headers, domain) VALUES (?, ?, ?, ?)")
            .bind(ip)
            .bind(hostname)
            .bind(headers)
            .bind(domain)
            .execute(&mut *conn)
            .await?;
        return Ok(Change::Inserted);
    }

    let Some(headers) = headers else {
        return Ok(Change::Unchanged);
    };
    let result = sqlx::query(&format!(
        "UPDATE data SET headers = ? WHERE domain = ? AND {column} = ? AND headers IS NULL"
    ))
    .bind(headers)
    .bind(domain)
    .bind(half.text())
    .execute(&mut *conn)
    .await?;

    Ok(if result.rows_affected() > 0 {
        Change::Updated
    } else {
        Change::Unchanged
    })
}

async fn delete_rows(
    conn: &mut SqliteConnection,
    rowids: impl Iterator<Item = i64>,
) -> Result<u64, sqlx::Error> {
    let mut deleted = 0;
    for rowid in rowids {
        deleted += sqlx::query("DELETE FROM data WHERE rowid = ?")
            .bind(rowid)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(deleted)
}

/// Every record of `domain`, ordered by hostname then IP.
pub async fn dump(pool: &Pool<Sqlite>, domain: &str) -> Result<Vec<DiscoveryRecord>, sqlx::Error> {
    let rows: Vec<(Option<String>, Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT ip, hostname, headers FROM data WHERE domain = ? ORDER BY hostname, ip",
    )
    .bind(domain)
    .fetch_all(pool)
    .await?;

    let records = rows
        .into_iter()
        .filter_map(|(ip, hostname, headers)| {
            DiscoveryRecord::new(domain, ip.as_deref(), hostname.as_deref(), None)
                .map(|r| r.with_headers(headers))
        })
        .collect();
    Ok(records)
}

/// All domains that have ever been written.
pub async fn list_domains(pool: &Pool<Sqlite>) -> Result<BTreeSet<String>, sqlx::Error> {
    let domains: Vec<String> = sqlx::query_scalar("SELECT domain FROM domains")
        .fetch_all(pool)
        .await?;
    Ok(domains.into_iter().collect())
}

/// Number of rows stored for `domain`.
pub async fn record_count(pool: &Pool<Sqlite>, domain: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM data WHERE domain = ?")
        .bind(domain)
        .fetch_one(pool)
        .await
}
