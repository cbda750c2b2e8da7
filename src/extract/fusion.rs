//! Multi-strategy ad-URL fusion.
//!
//! No single extraction strategy is reliable — ad markup varies by network and
//! page — so the pipeline unions several independent signal sources against the
//! same loaded page and filters the result conservatively. Strategies are
//! order-independent: the output is a deduplicated set keyed by exact URL.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, warn};

use crate::browser::BrowserDriver;

use super::adurl::{
    domain_of, is_ad_network_url, is_ad_serving_domain, is_same_site, parse_ad_redirect, strip_www,
};

/// Where a candidate came from (diagnostics only; all sources are unioned)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStrategy {
    RedirectParam,
    DirectAdLink,
    PageRescan,
    NetworkIntercept,
    IframeContent,
    AdAdjacent,
}

/// Intermediate candidate, never persisted
#[derive(Debug, Clone)]
struct AdLinkCandidate {
    url: String,
    strategy: SourceStrategy,
}

/// Final fusion output: deduplicated ad URLs plus the advertiser domains
/// derived from them
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdUrlSet {
    pub urls: Vec<String>,
    pub domains: Vec<String>,
}

impl AdUrlSet {
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Collect every anchor href on the page
const ALL_ANCHORS_JS: &str = r#"
    (function() {
        const links = [];
        document.querySelectorAll('a[href]').forEach(a => {
            if (a.href) links.push(a.href);
        });
        return links;
    })()
"#;

/// Collect anchor hrefs inside iframes; cross-origin frames are skipped
const IFRAME_ANCHORS_JS: &str = r#"
    (function() {
        const links = [];
        document.querySelectorAll('iframe').forEach(frame => {
            try {
                const doc = frame.contentDocument || (frame.contentWindow && frame.contentWindow.document);
                if (!doc) return;
                doc.querySelectorAll('a[href]').forEach(a => {
                    if (a.href) links.push(a.href);
                });
            } catch (e) {
                // cross-origin frame
            }
        });
        return links;
    })()
"#;

/// Collect anchors visually adjacent to ad iframes
const AD_ADJACENT_ANCHORS_JS: &str = r#"
    (function() {
        const adFrames = Array.from(document.querySelectorAll('iframe')).filter(f => {
            const src = f.src || '';
            const id = (f.id || '') + ' ' + (f.name || '');
            return src.includes('doubleclick') || src.includes('googlesyndication') ||
                   src.includes('adservice') || src.includes('/pagead/') ||
                   id.includes('google_ads') || id.includes('aswift');
        });
        if (adFrames.length === 0) return [];
        const rects = adFrames.map(f => f.getBoundingClientRect());
        const near = (a, b) => {
            const dx = Math.max(a.left - b.right, b.left - a.right, 0);
            const dy = Math.max(a.top - b.bottom, b.top - a.bottom, 0);
            return Math.sqrt(dx * dx + dy * dy) < 120;
        };
        const links = [];
        document.querySelectorAll('a[href]').forEach(a => {
            if (!a.href) return;
            const rect = a.getBoundingClientRect();
            if (rects.some(r => near(rect, r))) links.push(a.href);
        });
        return links;
    })()
"#;

/// Runs the extraction strategies against one loaded page and folds the
/// candidates into a single filtered set.
pub struct AdUrlFusion<'a> {
    driver: &'a dyn BrowserDriver,
}

impl<'a> AdUrlFusion<'a> {
    pub fn new(driver: &'a dyn BrowserDriver) -> Self {
        Self { driver }
    }

    /// Fuse all strategies for the links an extract step selected.
    ///
    /// `selector_links` are the raw hrefs the step's selector matched; the
    /// remaining strategies re-scan the page, the intercepted network requests
    /// and the ad iframes independently of that selection.
    pub async fn run(&self, selector_links: &[String]) -> AdUrlSet {
        let page_url = self.driver.current_url().await.unwrap_or_default();
        let page_domain = domain_of(&page_url).unwrap_or_default();

        let mut candidates: Vec<AdLinkCandidate> = Vec::new();

        // 1 + 2: redirect parameters and direct ad-network links from the
        // step's own selection
        for link in selector_links {
            harvest(link, SourceStrategy::RedirectParam, &mut candidates);
        }

        // 3: full-page anchor re-scan, same parse step
        for link in self.collect_js(ALL_ANCHORS_JS, "page rescan").await {
            if let Some(dest) = parse_ad_redirect(&link) {
                candidates.push(AdLinkCandidate { url: dest, strategy: SourceStrategy::PageRescan });
            }
        }

        // 4: passively intercepted ad requests; these are known-ad URLs, so
        // parse when a destination is embedded and take the raw URL otherwise
        for link in self.driver.intercepted_ad_urls() {
            match parse_ad_redirect(&link) {
                Some(dest) => candidates.push(AdLinkCandidate {
                    url: dest,
                    strategy: SourceStrategy::NetworkIntercept,
                }),
                None => candidates.push(AdLinkCandidate {
                    url: link,
                    strategy: SourceStrategy::NetworkIntercept,
                }),
            }
        }

        // 5: best-effort iframe reach-in (same-origin only)
        for link in self.collect_js(IFRAME_ANCHORS_JS, "iframe content").await {
            harvest(&link, SourceStrategy::IframeContent, &mut candidates);
        }

        // 6: last resort — external links visually adjacent to ad iframes are
        // taken as destinations without any redirect parameter
        for link in self.collect_js(AD_ADJACENT_ANCHORS_JS, "ad-adjacent").await {
            if !is_ad_network_url(&link) {
                candidates.push(AdLinkCandidate { url: link, strategy: SourceStrategy::AdAdjacent });
            }
        }

        debug!(
            "Ad-URL fusion collected {} candidates on {}",
            candidates.len(),
            page_domain
        );

        fold(candidates, &page_domain, &page_url)
    }

    /// Evaluate a collector script, swallowing failures (best-effort sources)
    async fn collect_js(&self, script: &str, label: &str) -> Vec<String> {
        match self.driver.evaluate(script).await {
            Ok(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!("Ad-URL {} collection failed: {}", label, e);
                Vec::new()
            }
        }
    }
}

/// Apply the shared parse step to one link: redirect destination first,
/// raw ad-network link as fallback
fn harvest(link: &str, parsed_strategy: SourceStrategy, out: &mut Vec<AdLinkCandidate>) {
    if let Some(dest) = parse_ad_redirect(link) {
        out.push(AdLinkCandidate { url: dest, strategy: parsed_strategy });
    } else if is_ad_network_url(link) {
        out.push(AdLinkCandidate { url: link.to_string(), strategy: SourceStrategy::DirectAdLink });
    }
}

/// Union, same-site filter and domain derivation.
///
/// The URL set may contain ad-serving hosts (a raw intercepted request is a
/// legitimate ad URL); the domain set never does.
fn fold(candidates: Vec<AdLinkCandidate>, page_domain: &str, page_url: &str) -> AdUrlSet {
    let mut urls: BTreeSet<String> = BTreeSet::new();
    for candidate in candidates {
        if is_same_site(&candidate.url, page_domain, page_url) {
            debug!(
                "Dropping same-site candidate {:?} from {:?}",
                candidate.url, candidate.strategy
            );
            continue;
        }
        urls.insert(candidate.url);
    }

    let mut domains: BTreeSet<String> = BTreeSet::new();
    for url in &urls {
        if let Some(domain) = domain_of(url) {
            if !is_ad_serving_domain(&domain) {
                domains.insert(strip_www(&domain));
            }
        }
    }

    AdUrlSet {
        urls: urls.into_iter().collect(),
        domains: domains.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::MockDriver;
    use serde_json::json;

    fn candidate(url: &str) -> AdLinkCandidate {
        AdLinkCandidate { url: url.to_string(), strategy: SourceStrategy::RedirectParam }
    }

    #[test]
    fn fold_drops_candidates_matching_current_domain() {
        // Destination domain equals the page domain: self-referential noise
        let result = fold(
            vec![candidate("http://shop.test/p")],
            "shop.test",
            "http://shop.test/",
        );
        assert!(result.urls.is_empty());
        assert!(result.domains.is_empty());
    }

    #[test]
    fn fold_keeps_external_destinations() {
        let result = fold(
            vec![candidate("http://shop.test/p")],
            "news.test",
            "http://news.test/",
        );
        assert_eq!(result.urls, vec!["http://shop.test/p"]);
        assert_eq!(result.domains, vec!["shop.test"]);
    }

    #[test]
    fn fold_is_order_independent_and_idempotent() {
        let a = vec![
            candidate("http://one.test/a"),
            candidate("http://two.test/b"),
            candidate("http://one.test/a"),
        ];
        let mut b = a.clone();
        b.reverse();

        let forward = fold(a, "news.test", "http://news.test/");
        let backward = fold(b, "news.test", "http://news.test/");
        assert_eq!(forward.urls, backward.urls);
        assert_eq!(forward.domains, backward.domains);
        assert_eq!(forward.urls.len(), 2);
    }

    #[test]
    fn fold_excludes_ad_serving_hosts_from_domains_only() {
        let result = fold(
            vec![candidate("https://googleads.g.doubleclick.net/pcs/click?x=1")],
            "news.test",
            "http://news.test/",
        );
        // The URL survives, the domain does not
        assert_eq!(result.urls.len(), 1);
        assert!(result.domains.is_empty());
    }

    #[test]
    fn fold_strips_www_from_domains() {
        let result = fold(
            vec![candidate("http://www.shop.test/p")],
            "news.test",
            "http://news.test/",
        );
        assert_eq!(result.domains, vec!["shop.test"]);
    }

    #[tokio::test]
    async fn redirect_link_to_own_site_yields_empty_set() {
        let driver = MockDriver::new().with_url("http://shop.test/products");
        let fusion = AdUrlFusion::new(&driver);

        let links = vec!["http://ads.net/click?adurl=http%3A%2F%2Fshop.test%2Fp".to_string()];
        let result = fusion.run(&links).await;
        assert!(result.urls.is_empty());
    }

    #[tokio::test]
    async fn redirect_link_to_external_site_is_extracted() {
        let driver = MockDriver::new().with_url("http://news.test/story");
        let fusion = AdUrlFusion::new(&driver);

        let links = vec!["http://ads.net/click?adurl=http%3A%2F%2Fshop.test%2Fp".to_string()];
        let result = fusion.run(&links).await;
        assert_eq!(result.urls, vec!["http://shop.test/p"]);
        assert_eq!(result.domains, vec!["shop.test"]);
    }

    #[tokio::test]
    async fn page_rescan_and_intercepted_requests_are_unioned() {
        let driver = MockDriver::new()
            .with_url("http://news.test/story")
            .with_script_result(
                "querySelectorAll('a[href]')",
                json!(["https://www.googleadservices.com/pagead/aclk?adurl=https%3A%2F%2Fstore.test%2Fx"]),
            )
            .with_intercepted(&["https://googleads.g.doubleclick.net/pcs/click?y=2"]);
        let fusion = AdUrlFusion::new(&driver);

        let result = fusion.run(&[]).await;
        assert!(result.urls.contains(&"https://store.test/x".to_string()));
        assert!(result
            .urls
            .contains(&"https://googleads.g.doubleclick.net/pcs/click?y=2".to_string()));
        // Only the advertiser domain survives the domain derivation
        assert_eq!(result.domains, vec!["store.test"]);
    }

    #[tokio::test]
    async fn evaluate_failures_are_swallowed() {
        let driver = MockDriver::new().with_url("http://news.test/story");
        driver.closed.store(true, std::sync::atomic::Ordering::Relaxed);
        let fusion = AdUrlFusion::new(&driver);

        // A closed driver fails every script call; fusion still returns a set
        let result = fusion.run(&[]).await;
        assert!(result.urls.is_empty());
    }
}
