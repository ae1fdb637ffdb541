//! HTML rewriting for open and click tracking.
//!
//! Anchors pointing at trackable URLs are redirected through the click
//! endpoint; a 1×1 pixel is injected before `</body>` for opens. URLs that
//! look like opt-out, anchor, or non-HTTP links are left verbatim. Identical
//! URLs within one message share a single click id.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use super::ids::tracking_id;

lazy_static! {
    static ref ANCHOR: Regex =
        Regex::new(r#"(?i)<a\s+([^>]*?)href=["']([^"']+)["']([^>]*)>"#)
            .expect("anchor pattern is valid");
    static ref BODY_CLOSE: Regex = Regex::new(r"(?i)</body>").expect("body pattern is valid");
}

/// URL fragments that exempt a link from rewriting.
const EXCLUDED_FRAGMENTS: [&str; 5] = ["unsubscribe", "optout", "mailto:", "tel:", "#"];

/// Which tracking features to apply.
#[derive(Debug, Clone)]
pub struct RewriteConfig {
    pub base_url: String,
    pub open_tracking: bool,
    pub click_tracking: bool,
}

/// One rewritten link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedLink {
    pub tracking_id: String,
    pub original_url: String,
    pub tracking_url: String,
}

/// Outcome of rewriting one message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingRewrite {
    pub modified_html: String,
    pub open_tracking_id: Option<String>,
    pub links: Vec<TrackedLink>,
}

/// Whether a URL must be preserved verbatim.
pub fn is_excluded(url: &str) -> bool {
    let lowered = url.to_ascii_lowercase();
    EXCLUDED_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
}

/// Rewrite anchors and inject the open pixel according to `config`.
pub fn rewrite_html(html: &str, config: &RewriteConfig) -> TrackingRewrite {
    let mut links: Vec<TrackedLink> = Vec::new();
    let mut modified = html.to_owned();

    if config.click_tracking {
        for caps in ANCHOR.captures_iter(html) {
            let url = &caps[2];
            if is_excluded(url) || links.iter().any(|l| l.original_url == url) {
                continue;
            }
            let id = tracking_id();
            links.push(TrackedLink {
                tracking_url: format!("{}/t/c/{id}", config.base_url),
                tracking_id: id,
                original_url: url.to_owned(),
            });
        }

        modified = ANCHOR
            .replace_all(&modified, |caps: &Captures<'_>| {
                let url = &caps[2];
                match links.iter().find(|l| l.original_url == url) {
                    Some(link) => {
                        format!("<a {}href=\"{}\"{}>", &caps[1], link.tracking_url, &caps[3])
                    }
                    None => caps[0].to_owned(),
                }
            })
            .into_owned();
    }

    let open_tracking_id = config.open_tracking.then(tracking_id);
    if let Some(id) = &open_tracking_id {
        let pixel = format!(
            "<img src=\"{}/t/o/{id}\" width=\"1\" height=\"1\" alt=\"\" \
             style=\"display:none;width:1px;height:1px;border:0;\" />",
            config.base_url
        );
        modified = match BODY_CLOSE.find(&modified) {
            Some(close) => {
                let mut with_pixel = String::with_capacity(modified.len() + pixel.len());
                with_pixel.push_str(&modified[..close.start()]);
                with_pixel.push_str(&pixel);
                with_pixel.push_str(&modified[close.start()..]);
                with_pixel
            }
            None => {
                let mut with_pixel = modified;
                with_pixel.push_str(&pixel);
                with_pixel
            }
        };
    }

    TrackingRewrite {
        modified_html: modified,
        open_tracking_id,
        links,
    }
}
