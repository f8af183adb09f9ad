use std::sync::LazyLock;

use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::db::RawRecord;
use crate::error::ListingNotFound;
use crate::parser::price;

static CONTAINER: LazyLock<Selector> = LazyLock::new(|| Selector::parse("ul.items_group").unwrap());
static IMAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".item_img img").unwrap());
static ARTIST: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".artist_author .item_link").unwrap());
static ALBUM: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".album_book .item_link").unwrap());
static MEDIUM: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".item_medium").unwrap());
static PRICE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".item_price").unwrap());
static DETAIL_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".item_img_link").unwrap());

/// Pull one `RawRecord` per top-level `li` of the product list, in page order.
///
/// Fields are extracted independently: a missing sub-element leaves that
/// field `None` and the record is still returned. Items without a `data-id`
/// are skipped because nothing else identifies them on the site.
pub fn extract(document: &Html, base_url: &Url) -> Result<Vec<RawRecord>, ListingNotFound> {
    let container = document.select(&CONTAINER).next().ok_or(ListingNotFound)?;

    let records: Vec<RawRecord> = container
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "li")
        .enumerate()
        .filter_map(|(index, item)| extract_item(item, index, base_url))
        .collect();

    debug!("Extracted {} records", records.len());
    Ok(records)
}

fn extract_item(item: ElementRef, index: usize, base_url: &Url) -> Option<RawRecord> {
    let Some(external_id) = item
        .value()
        .attr("data-id")
        .map(str::trim)
        .filter(|id| !id.is_empty())
    else {
        warn!(index, "Skipping list item without data-id");
        return None;
    };

    let image_url = first(item, &IMAGE)
        .and_then(|img| img.value().attr("src"))
        .and_then(|src| absolute(base_url, src));
    let detail_url = first(item, &DETAIL_LINK)
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| absolute(base_url, href));
    let price = first(item, &PRICE)
        .and_then(leading_text)
        .and_then(|text| price::normalize(&text));

    Some(RawRecord {
        external_id: external_id.to_string(),
        artist: first(item, &ARTIST).and_then(text_of),
        album: first(item, &ALBUM).and_then(text_of),
        medium: first(item, &MEDIUM).and_then(text_of),
        price,
        image_url,
        detail_url,
    })
}

fn first<'a>(item: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    item.select(selector).next()
}

/// All descendant text, whitespace collapsed. Empty text counts as missing.
fn text_of(el: ElementRef) -> Option<String> {
    let text = el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

/// The first non-blank text node directly under `el`. Child elements such as
/// a currency badge or a struck-through old price are not looked into.
fn leading_text(el: ElementRef) -> Option<String> {
    el.children().find_map(|node| match node.value() {
        Node::Text(t) if !t.trim().is_empty() => Some(t.trim().to_string()),
        _ => None,
    })
}

fn absolute(base_url: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match base_url.join(raw) {
        Ok(url) => Some(url.into()),
        Err(e) => {
            warn!("Could not resolve {:?} against {}: {}", raw, base_url, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.mascom.rs").unwrap()
    }

    fn parse(html: &str) -> Result<Vec<RawRecord>, ListingNotFound> {
        extract(&Html::parse_document(html), &base())
    }

    fn fixture() -> Vec<RawRecord> {
        let html = std::fs::read_to_string("tests/fixtures/items_group.html").unwrap();
        parse(&html).unwrap()
    }

    #[test]
    fn missing_container() {
        let result = parse("<html><body><div class=\"empty\">Nema proizvoda</div></body></html>");
        assert!(result.is_err());
    }

    #[test]
    fn empty_container() {
        let records = parse("<ul class=\"items_group\"></ul>").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn fixture_order_and_count() {
        let records = fixture();
        let ids: Vec<&str> = records.iter().map(|r| r.external_id.as_str()).collect();
        assert_eq!(ids, ["101", "102", "103", "104"]);
    }

    #[test]
    fn full_item() {
        let r = &fixture()[0];
        assert_eq!(r.artist.as_deref(), Some("Pink Floyd"));
        assert_eq!(r.album.as_deref(), Some("The Wall"));
        assert_eq!(r.medium.as_deref(), Some("2LP"));
        assert_eq!(r.price, Some(6999.00));
        assert_eq!(r.image_url.as_deref(), Some("https://www.mascom.rs/images/items/101.jpg"));
        assert_eq!(
            r.detail_url.as_deref(),
            Some("https://www.mascom.rs/sr/pink-floyd-the-wall.html")
        );
    }

    #[test]
    fn price_ignores_nested_markup() {
        let r = &fixture()[1];
        assert_eq!(r.price, Some(3299.00));
        assert_eq!(r.image_url.as_deref(), Some("https://cdn.mascom.rs/items/102.jpg"));
    }

    #[test]
    fn missing_fields_are_none() {
        let r = &fixture()[2];
        assert_eq!(r.artist, None);
        assert_eq!(r.album, None);
        assert_eq!(r.price, None);
        assert_eq!(r.medium.as_deref(), Some("CD"));
        assert!(r.detail_url.is_some());
    }

    #[test]
    fn unparseable_price_and_nested_items() {
        let records = fixture();
        let r = &records[3];
        assert_eq!(r.artist.as_deref(), Some("Nina Simone"));
        assert_eq!(r.price, None);
        assert!(records.iter().all(|r| r.external_id != "999"));
    }

    #[test]
    fn whitespace_is_collapsed() {
        let html = r#"<ul class="items_group"><li data-id="7">
            <div class="artist_author"><a class="item_link">
                Miles
                Davis
            </a></div>
            <div class="album_book"><a class="item_link">   </a></div>
        </li></ul>"#;
        let records = parse(html).unwrap();
        assert_eq!(records[0].artist.as_deref(), Some("Miles Davis"));
        assert_eq!(records[0].album, None);
    }
}
