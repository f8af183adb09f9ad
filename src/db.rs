use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::Serialize;
use url::Url;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

pub fn connect(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sites (
            id         INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            base_url   TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- artist/album keep the first-seen spelling; *_key carry identity
        CREATE TABLE IF NOT EXISTS products (
            id         INTEGER PRIMARY KEY,
            artist     TEXT,
            album      TEXT,
            artist_key TEXT NOT NULL,
            album_key  TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(artist_key, album_key)
        );

        CREATE TABLE IF NOT EXISTS listings (
            id            INTEGER PRIMARY KEY,
            site_id       INTEGER NOT NULL REFERENCES sites(id),
            product_id    INTEGER NOT NULL REFERENCES products(id),
            external_id   TEXT NOT NULL,
            detail_url    TEXT NOT NULL,
            image_url     TEXT,
            medium        TEXT,
            current_price REAL,
            last_seen     TEXT NOT NULL,
            UNIQUE(site_id, detail_url)
        );
        CREATE INDEX IF NOT EXISTS idx_listings_product ON listings(product_id);

        CREATE TABLE IF NOT EXISTS price_events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            listing_id  INTEGER NOT NULL REFERENCES listings(id),
            price       REAL,
            observed_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_price_events_listing ON price_events(listing_id, id);

        CREATE TRIGGER IF NOT EXISTS price_events_no_update
        BEFORE UPDATE ON price_events
        BEGIN
            SELECT RAISE(ABORT, 'price_events is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS price_events_no_delete
        BEFORE DELETE ON price_events
        BEGIN
            SELECT RAISE(ABORT, 'price_events is append-only');
        END;
        ",
    )?;
    Ok(())
}

// ── Records ──

/// The site a page belongs to. `base_url` is its identity in `sites`.
#[derive(Debug, Clone)]
pub struct SiteDescriptor {
    pub name: String,
    pub base_url: Url,
}

/// One product item as it appeared on a listing page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRecord {
    pub external_id: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub medium: Option<String>,
    pub price: Option<f64>,
    pub image_url: Option<String>,
    pub detail_url: Option<String>,
}

pub struct NewListing<'a> {
    pub site_id: i64,
    pub product_id: i64,
    pub external_id: &'a str,
    pub detail_url: &'a str,
    pub image_url: Option<&'a str>,
    pub medium: Option<&'a str>,
    pub price: Option<f64>,
    pub seen_at: DateTime<Utc>,
}

// ── Upserts ──
//
// Every resolver is a single INSERT .. ON CONFLICT .. RETURNING statement so
// identity is decided by the UNIQUE constraint, never by a prior SELECT. The
// no-op `SET col = excluded.col` exists only to make RETURNING yield the
// existing row.

pub fn upsert_site(conn: &Connection, site: &SiteDescriptor) -> Result<i64> {
    conn.query_row(
        "INSERT INTO sites (name, base_url) VALUES (?1, ?2)
         ON CONFLICT(base_url) DO UPDATE SET base_url = excluded.base_url
         RETURNING id",
        params![site.name, site.base_url.as_str()],
        |r| r.get(0),
    )
}

pub fn upsert_product(conn: &Connection, artist: Option<&str>, album: Option<&str>) -> Result<i64> {
    conn.query_row(
        "INSERT INTO products (artist, album, artist_key, album_key) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(artist_key, album_key) DO UPDATE SET artist_key = excluded.artist_key
         RETURNING id",
        params![artist, album, identity_key(artist), identity_key(album)],
        |r| r.get(0),
    )
}

pub fn upsert_listing(conn: &Connection, l: &NewListing) -> Result<i64> {
    conn.query_row(
        "INSERT INTO listings
         (site_id, product_id, external_id, detail_url, image_url, medium, current_price, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(site_id, detail_url) DO UPDATE SET
            external_id   = excluded.external_id,
            image_url     = excluded.image_url,
            medium        = excluded.medium,
            current_price = excluded.current_price,
            last_seen     = excluded.last_seen
         RETURNING id",
        params![
            l.site_id, l.product_id, l.external_id, l.detail_url, l.image_url, l.medium,
            l.price, l.seen_at,
        ],
        |r| r.get(0),
    )
}

pub fn insert_price_event(
    conn: &Connection,
    listing_id: i64,
    price: Option<f64>,
    observed_at: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO price_events (listing_id, price, observed_at) VALUES (?1, ?2, ?3)",
        params![listing_id, price, observed_at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Case-folded, whitespace-collapsed form used for product identity.
/// A missing value keys as the empty string so unknown products share a row.
pub fn identity_key(value: Option<&str>) -> String {
    value
        .map(|v| WHITESPACE_RE.replace_all(v.trim(), " ").to_lowercase())
        .unwrap_or_default()
}

// ── Reads ──

#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRow {
    pub id: i64,
    pub site_id: i64,
    pub product_id: i64,
    pub detail_url: String,
    pub image_url: Option<String>,
    pub medium: Option<String>,
    pub current_price: Option<f64>,
    pub last_seen: DateTime<Utc>,
}

#[allow(dead_code)]
pub fn fetch_listing(conn: &Connection, site_id: i64, detail_url: &str) -> Result<Option<ListingRow>> {
    conn.query_row(
        "SELECT id, site_id, product_id, detail_url, image_url, medium, current_price, last_seen
         FROM listings WHERE site_id = ?1 AND detail_url = ?2",
        params![site_id, detail_url],
        |row| {
            Ok(ListingRow {
                id: row.get(0)?,
                site_id: row.get(1)?,
                product_id: row.get(2)?,
                detail_url: row.get(3)?,
                image_url: row.get(4)?,
                medium: row.get(5)?,
                current_price: row.get(6)?,
                last_seen: row.get(7)?,
            })
        },
    )
    .optional()
}

pub struct PriceHistoryRow {
    pub site: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub price: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

/// Price events for every listing with this detail URL, oldest first.
pub fn fetch_price_history(conn: &Connection, detail_url: &str) -> Result<Vec<PriceHistoryRow>> {
    let mut stmt = conn.prepare(
        "SELECT s.base_url, p.artist, p.album, e.price, e.observed_at
         FROM price_events e
         JOIN listings l ON l.id = e.listing_id
         JOIN sites s    ON s.id = l.site_id
         JOIN products p ON p.id = l.product_id
         WHERE l.detail_url = ?1
         ORDER BY e.id",
    )?;
    let rows = stmt
        .query_map([detail_url], |row| {
            Ok(PriceHistoryRow {
                site: row.get(0)?,
                artist: row.get(1)?,
                album: row.get(2)?,
                price: row.get(3)?,
                observed_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

// ── Stats ──

#[derive(Debug, Default, PartialEq)]
pub struct Stats {
    pub sites: usize,
    pub products: usize,
    pub listings: usize,
    pub price_events: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |table: &str| -> Result<usize> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
    };
    Ok(Stats {
        sites: count("sites")?,
        products: count("products")?,
        listings: count("listings")?,
        price_events: count("price_events")?,
    })
}

#[cfg(test)]
pub(crate) fn memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    init_schema(&conn).unwrap();
    conn
}
