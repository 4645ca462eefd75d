use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

lazy_static! {
    /// HTTP(S) URL mentioning a tax-authority or receipt-portal keyword anywhere
    /// after the scheme.
    static ref RECEIPT_URL: Regex = Regex::new(
        r"(?i)^https?://.*(?:fazenda|sefaz|nfce|nfe|qrcode|decodificacao|portal)"
    )
    .unwrap();
}

/// Allow-list check for fiscal receipt URLs. Conservative: unknown portals are
/// rejected rather than risk dispatching on arbitrary QR codes.
pub fn is_valid(text: &str) -> bool {
    if text.is_empty() || !RECEIPT_URL.is_match(text) {
        return false;
    }

    // The pattern alone accepts hosts no HTTP client could reach.
    match Url::parse(text) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
        Err(_) => false,
    }
}
