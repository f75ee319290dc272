//! Page-side helpers evaluated through [`super::BrowserSession::run_script`].

use serde_json::Value;

/// A small piece of DOM work the executor asks the page to do.
///
/// Every script evaluates to a JSON value: `InnerText` yields the text or
/// `null`, the others yield `true` when their element was found.
#[derive(Debug, Clone, PartialEq)]
pub enum PageScript {
    /// Geometry of the first rendered match, or `null`
    BoundingBox { selector: String },
    InnerText { selector: String },
    /// Scroll an element, or the document when `selector` is `None`
    ScrollBy {
        selector: Option<String>,
        dx: f64,
        dy: f64,
    },
    ScrollIntoView { selector: String },
    /// Select the 1-based `nth` option and fire `change`
    SelectOption { selector: String, nth: u32 },
}

impl PageScript {
    pub fn to_js(&self) -> String {
        match self {
            PageScript::BoundingBox { selector } => format!(
                "(() => {{ const el = document.querySelector({}); \
                 if (!el || el.getClientRects().length === 0) return null; \
                 const r = el.getBoundingClientRect(); \
                 return {{ x: r.left, y: r.top, width: r.width, height: r.height }}; }})()",
                quote(selector)
            ),
            PageScript::InnerText { selector } => format!(
                "(() => {{ const el = document.querySelector({}); return el ? el.innerText : null; }})()",
                quote(selector)
            ),
            PageScript::ScrollBy {
                selector: None,
                dx,
                dy,
            } => format!("(() => {{ window.scrollBy({dx}, {dy}); return true; }})()"),
            PageScript::ScrollBy {
                selector: Some(selector),
                dx,
                dy,
            } => format!(
                "(() => {{ const el = document.querySelector({}); if (!el) return false; \
                 el.scrollLeft += {dx}; el.scrollTop += {dy}; return true; }})()",
                quote(selector)
            ),
            PageScript::ScrollIntoView { selector } => format!(
                "(() => {{ const el = document.querySelector({}); if (!el) return false; \
                 el.scrollIntoView(true); return true; }})()",
                quote(selector)
            ),
            PageScript::SelectOption { selector, nth } => format!(
                "(() => {{ const el = document.querySelector({}); \
                 if (!el || !el.options || el.options.length < {nth}) return false; \
                 el.selectedIndex = {idx}; \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
                quote(selector),
                idx = nth.saturating_sub(1)
            ),
        }
    }

    pub fn selector(&self) -> Option<&str> {
        match self {
            PageScript::BoundingBox { selector }
            | PageScript::InnerText { selector }
            | PageScript::ScrollIntoView { selector }
            | PageScript::SelectOption { selector, .. } => Some(selector),
            PageScript::ScrollBy { selector, .. } => selector.as_deref(),
        }
    }
}

/// JSON string literals are valid JavaScript string literals
fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_is_quoted() {
        let js = PageScript::InnerText {
            selector: "a[title=\"x\"]".to_string(),
        }
        .to_js();
        assert!(js.contains(r#"document.querySelector("a[title=\"x\"]")"#));
    }

    #[test]
    fn test_select_option_is_one_based() {
        let js = PageScript::SelectOption {
            selector: "#s".to_string(),
            nth: 2,
        }
        .to_js();
        assert!(js.contains("el.selectedIndex = 1;"));
        assert!(js.contains("el.options.length < 2"));
    }

    #[test]
    fn test_document_scroll() {
        let js = PageScript::ScrollBy {
            selector: None,
            dx: 0.0,
            dy: 120.0,
        }
        .to_js();
        assert!(js.contains("window.scrollBy(0, 120)"));
    }
}
