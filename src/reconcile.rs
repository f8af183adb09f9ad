use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::db::{self, NewListing, RawRecord, SiteDescriptor};
use crate::error::ReconcileError;

/// Row ids touched while reconciling one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub site_id: i64,
    pub product_id: i64,
    pub listing_id: i64,
    pub price_event_id: i64,
}

/// Resolve site, product and listing for `record`, then append its price
/// event. All four writes commit together or not at all.
pub fn reconcile(
    conn: &Connection,
    site: &SiteDescriptor,
    record: &RawRecord,
) -> Result<Reconciled, ReconcileError> {
    reconcile_at(conn, site, record, Utc::now())
}

pub(crate) fn reconcile_at(
    conn: &Connection,
    site: &SiteDescriptor,
    record: &RawRecord,
    now: DateTime<Utc>,
) -> Result<Reconciled, ReconcileError> {
    // (site, NULL) never conflicts in SQLite, so an unkeyed listing would
    // duplicate on every run.
    let Some(detail_url) = record.detail_url.as_deref() else {
        return Err(ReconcileError::MissingDetailUrl {
            site: site.base_url.to_string(),
            external_id: record.external_id.clone(),
        });
    };

    write_record(conn, site, record, detail_url, now).map_err(|source| ReconcileError::Store {
        site: site.base_url.to_string(),
        detail_url: detail_url.to_string(),
        source,
    })
}

fn write_record(
    conn: &Connection,
    site: &SiteDescriptor,
    record: &RawRecord,
    detail_url: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<Reconciled> {
    let tx = conn.unchecked_transaction()?;

    let site_id = db::upsert_site(&tx, site)?;
    let product_id = db::upsert_product(&tx, record.artist.as_deref(), record.album.as_deref())?;
    let listing_id = db::upsert_listing(
        &tx,
        &NewListing {
            site_id,
            product_id,
            external_id: &record.external_id,
            detail_url,
            image_url: record.image_url.as_deref(),
            medium: record.medium.as_deref(),
            price: record.price,
            seen_at: now,
        },
    )?;
    let price_event_id = db::insert_price_event(&tx, listing_id, record.price, now)?;

    tx.commit()?;
    Ok(Reconciled {
        site_id,
        product_id,
        listing_id,
        price_event_id,
    })
}
