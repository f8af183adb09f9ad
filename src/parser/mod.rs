pub mod listing;
pub mod price;

use scraper::Html;
use url::Url;

use crate::db::RawRecord;
use crate::error::ListingNotFound;

/// Page body → records. The parsed document is dropped before returning.
pub fn parse_page(body: &str, base_url: &Url) -> Result<Vec<RawRecord>, ListingNotFound> {
    let document = Html::parse_document(body);
    listing::extract(&document, base_url)
}
