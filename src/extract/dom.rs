//! DOM extraction script builders.
//!
//! Extraction runs inside the page (CSS selectors via `querySelectorAll`,
//! XPath via `document.evaluate`) and returns a JSON array of strings back
//! through the driver's evaluate call.

/// Quote a string as a JavaScript string literal
pub(crate) fn js_quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Script collecting text or an attribute from all CSS-selector matches
pub fn css_extract_script(selector: &str, attribute: Option<&str>) -> String {
    let selector = js_quote(selector);
    let value_expr = match attribute {
        // href resolves to an absolute URL through the property, not the raw attribute
        Some("href") => "(el.href || el.getAttribute('href') || '')".to_string(),
        Some(attr) => format!("(el.getAttribute({}) || '')", js_quote(attr)),
        None => "(el.innerText || el.textContent || '')".to_string(),
    };

    format!(
        r#"
        (function() {{
            const out = [];
            document.querySelectorAll({selector}).forEach(el => {{
                const value = {value_expr};
                if (value) out.push(String(value).trim());
            }});
            return out;
        }})()
        "#
    )
}

/// Script collecting text or an attribute from all XPath matches
pub fn xpath_extract_script(xpath: &str, attribute: Option<&str>) -> String {
    let xpath = js_quote(xpath);
    let value_expr = match attribute {
        Some(attr) => format!(
            "(node.getAttribute ? (node.getAttribute({}) || '') : '')",
            js_quote(attr)
        ),
        None => "(node.innerText || node.textContent || node.nodeValue || '')".to_string(),
    };

    format!(
        r#"
        (function() {{
            const out = [];
            const snapshot = document.evaluate(
                {xpath}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
            for (let i = 0; i < snapshot.snapshotLength; i++) {{
                const node = snapshot.snapshotItem(i);
                const value = {value_expr};
                if (value) out.push(String(value).trim());
            }}
            return out;
        }})()
        "#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_script_embeds_quoted_selector() {
        let script = css_extract_script("a[href*='ads']", Some("href"));
        assert!(script.contains(r#""a[href*='ads']""#));
        assert!(script.contains("el.href"));
    }

    #[test]
    fn css_script_defaults_to_inner_text() {
        let script = css_extract_script(".title", None);
        assert!(script.contains("innerText"));
    }

    #[test]
    fn xpath_script_uses_document_evaluate() {
        let script = xpath_extract_script("//a[@class=\"ad\"]", None);
        assert!(script.contains("document.evaluate"));
        assert!(script.contains(r#""//a[@class=\"ad\"]""#));
    }

    #[test]
    fn js_quote_escapes_quotes_and_newlines() {
        assert_eq!(js_quote("a\"b\n"), r#""a\"b\n""#);
    }
}
