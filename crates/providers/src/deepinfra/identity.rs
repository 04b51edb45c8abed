use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, PRAGMA, REFERER,
};

/// Static browser-identity headers sent with every request. The service
/// answers keyless traffic only when it looks like its own web embed.
pub fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9,id;q=0.8"),
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        "sec-ch-ua",
        HeaderValue::from_static(
            "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Microsoft Edge\";v=\"120\"",
        ),
    );
    headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
    headers.insert("sec-ch-ua-platform", HeaderValue::from_static("\"Windows\""));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("same-site"));
    headers.insert("x-deepinfra-source", HeaderValue::from_static("web-embed"));
    headers.insert(REFERER, HeaderValue::from_static("https://deepinfra.com/"));
    headers
}

/// Fresh forwarded-for address so no two requests share one. Octets avoid
/// 0 and 255.
pub fn random_ipv4() -> String {
    format!(
        "{}.{}.{}.{}",
        fastrand::u8(1..=254),
        fastrand::u8(1..=254),
        fastrand::u8(1..=254),
        fastrand::u8(1..=254)
    )
}
