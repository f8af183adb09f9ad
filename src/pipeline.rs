use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::Connection;
use tracing::{error, info, warn};
use url::Url;

use crate::db::{self, RawRecord, SiteDescriptor};
use crate::error::{FetchError, RunError};
use crate::fetch::PageFetcher;
use crate::parser;
use crate::reconcile;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub records_scraped: usize,
    pub records_persisted: usize,
    pub failures: usize,
    /// Stopped early on a shutdown request.
    pub interrupted: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} scraped, {} persisted, {} failed",
            self.records_scraped, self.records_persisted, self.failures
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

/// Fetch one listing page and extract its records.
///
/// A page without the product list is logged and yields no records.
pub async fn scrape<F: PageFetcher>(
    fetcher: &F,
    url: &str,
    base_url: &Url,
) -> Result<Vec<RawRecord>, FetchError> {
    let body = fetcher.fetch(url).await?;
    match parser::parse_page(&body, base_url) {
        Ok(records) => Ok(records),
        Err(e) => {
            warn!("{} ({})", e, url);
            Ok(Vec::new())
        }
    }
}

/// fetch → extract → reconcile for a single page.
pub struct Pipeline<'a, F> {
    conn: &'a Connection,
    fetcher: F,
    site: SiteDescriptor,
    target_url: String,
    shutdown: Option<Arc<AtomicBool>>,
}

impl<'a, F: PageFetcher> Pipeline<'a, F> {
    pub fn new(conn: &'a Connection, fetcher: F, site: SiteDescriptor, target_url: String) -> Self {
        Self {
            conn,
            fetcher,
            site,
            target_url,
            shutdown: None,
        }
    }

    /// Checked between records; once set, the run stops after the record in
    /// flight has committed.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub async fn run(&self) -> Result<RunSummary, RunError> {
        db::init_schema(self.conn)?;
        let mut summary = RunSummary::default();

        let records = match scrape(&self.fetcher, &self.target_url, &self.site.base_url).await {
            Ok(records) => records,
            Err(source) => {
                error!(retryable = source.is_retryable(), "Run aborted: {}", source);
                return Err(RunError::Fetch { source, summary });
            }
        };
        summary.records_scraped = records.len();
        info!("Scraped {} records from {}", records.len(), self.target_url);

        for (i, record) in records.iter().enumerate() {
            if self.shutdown_requested() {
                warn!(remaining = records.len() - i, "Shutdown requested, stopping");
                summary.interrupted = true;
                break;
            }

            match reconcile::reconcile(self.conn, &self.site, record) {
                Ok(ids) => {
                    summary.records_persisted += 1;
                    info!(
                        site_id = ids.site_id,
                        product_id = ids.product_id,
                        listing_id = ids.listing_id,
                        price_event_id = ids.price_event_id,
                        price = ?record.price,
                        "[{}] {} - {}",
                        record.external_id,
                        record.artist.as_deref().unwrap_or("?"),
                        record.album.as_deref().unwrap_or("?")
                    );
                }
                Err(e) => {
                    summary.failures += 1;
                    error!(
                        site = %self.site.base_url,
                        detail_url = record.detail_url.as_deref().unwrap_or("-"),
                        external_id = %record.external_id,
                        "Skipping record: {}",
                        e
                    );
                }
            }
        }

        info!(
            scraped = summary.records_scraped,
            persisted = summary.records_persisted,
            failures = summary.failures,
            "Run finished"
        );
        Ok(summary)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;
    use crate::db::{get_stats, memory, Stats};

    struct Page(String);

    impl PageFetcher for Page {
        async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
            Ok(self.0.clone())
        }
    }

    struct Down(StatusCode);

    impl PageFetcher for Down {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            Err(FetchError::Status {
                url: url.to_string(),
                status: self.0,
            })
        }
    }

    fn site() -> SiteDescriptor {
        SiteDescriptor {
            name: "Mascom".into(),
            base_url: Url::parse("https://www.mascom.rs").unwrap(),
        }
    }

    fn fixture_page() -> Page {
        Page(std::fs::read_to_string("tests/fixtures/items_group.html").unwrap())
    }

    fn pipeline<F: PageFetcher>(conn: &Connection, fetcher: F) -> Pipeline<'_, F> {
        Pipeline::new(conn, fetcher, site(), "https://www.mascom.rs/sr/muzika.1.90.html".into())
    }

    #[tokio::test]
    async fn fixture_run_persists_every_record() {
        let conn = memory();
        let summary = pipeline(&conn, fixture_page()).run().await.unwrap();

        assert_eq!(summary.records_scraped, 4);
        assert_eq!(summary.records_persisted, 4);
        assert_eq!(summary.failures, 0);
        assert_eq!(
            get_stats(&conn).unwrap(),
            Stats { sites: 1, products: 4, listings: 4, price_events: 4 }
        );
    }

    #[tokio::test]
    async fn second_run_only_grows_history() {
        let conn = memory();
        let p = pipeline(&conn, fixture_page());
        p.run().await.unwrap();
        p.run().await.unwrap();

        assert_eq!(
            get_stats(&conn).unwrap(),
            Stats { sites: 1, products: 4, listings: 4, price_events: 8 }
        );
    }

    #[tokio::test]
    async fn empty_list_writes_nothing() {
        let conn = memory();
        let page = Page("<ul class=\"items_group\">\n</ul>".into());
        let summary = pipeline(&conn, page).run().await.unwrap();

        assert_eq!(summary, RunSummary::default());
        assert_eq!(get_stats(&conn).unwrap(), Stats::default());
    }

    #[tokio::test]
    async fn page_without_list_completes_empty() {
        let conn = memory();
        let page = Page("<html><body><p>Stranica ne postoji</p></body></html>".into());
        let summary = pipeline(&conn, page).run().await.unwrap();
        assert_eq!(summary.records_scraped, 0);
    }

    #[tokio::test]
    async fn http_error_aborts_run() {
        let conn = memory();
        let err = pipeline(&conn, Down(StatusCode::BAD_GATEWAY)).run().await.unwrap_err();

        assert!(matches!(err, RunError::Fetch { .. }));
        assert_eq!(err.summary().records_persisted, 0);
        assert_eq!(get_stats(&conn).unwrap(), Stats::default());
    }

    #[tokio::test]
    async fn bad_record_does_not_stop_the_run() {
        let conn = memory();
        let page = Page(
            r#"<ul class="items_group">
                <li data-id="1"><a class="item_img_link" href="/sr/a.html"></a></li>
                <li data-id="2"><div class="item_price">1.000,00</div></li>
                <li data-id="3"><a class="item_img_link" href="/sr/c.html"></a></li>
            </ul>"#
                .into(),
        );
        let summary = pipeline(&conn, page).run().await.unwrap();

        assert_eq!(summary.records_scraped, 3);
        assert_eq!(summary.records_persisted, 2);
        assert_eq!(summary.failures, 1);
    }

    #[tokio::test]
    async fn shutdown_stops_between_records() {
        let conn = memory();
        let flag = Arc::new(AtomicBool::new(true));
        let summary = pipeline(&conn, fixture_page())
            .with_shutdown(flag)
            .run()
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.records_scraped, 4);
        assert_eq!(summary.records_persisted, 0);
    }

    #[test]
    fn summary_display() {
        let s = RunSummary {
            records_scraped: 4,
            records_persisted: 3,
            failures: 1,
            interrupted: false,
        };
        assert_eq!(s.to_string(), "4 scraped, 3 persisted, 1 failed");
    }
}
