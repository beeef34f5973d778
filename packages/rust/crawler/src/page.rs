//! Contact details found in a fetched HTML page.

use std::collections::HashSet;
use std::sync::LazyLock;

use optout_shared::ExtractedContacts;
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use url::Url;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[a-z0-9][a-z0-9._%+-]*@[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*\.[a-z]{2,24}")
        .expect("valid email regex")
});

static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| sel("a[href]"));
static FORM_SEL: LazyLock<Selector> = LazyLock::new(|| sel("form"));
static CONTACT_FIELD_SEL: LazyLock<Selector> = LazyLock::new(|| sel("textarea, input"));
static SEARCH_INPUT_SEL: LazyLock<Selector> = LazyLock::new(|| sel("input"));

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

/// File extensions that show up as `name@2x.png` false positives.
const ASSET_SUFFIXES: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".avif", ".ico", ".css", ".js",
];

/// Domains used as placeholders in form hints and templates.
const PLACEHOLDER_DOMAINS: &[&str] = &[
    "example.com",
    "example.org",
    "example.net",
    "domain.com",
    "yourdomain.com",
    "email.com",
    "sentry.io",
];

/// Field names that mark a form as a site search box.
const SEARCH_FIELD_NAMES: &[&str] = &["q", "s", "search", "query", "keywords"];

/// Analyze a parsed page. `base` is the final URL after redirects.
pub fn analyze(doc: &Html, base: &Url) -> ExtractedContacts {
    let emails = collect_emails(doc);
    let contact_form = doc.select(&FORM_SEL).find(|f| is_contact_form(*f));

    ExtractedContacts {
        emails,
        has_form: contact_form.is_some(),
        form_url: contact_form.and_then(|f| form_action(f, base)),
    }
}

// ---------------------------------------------------------------------------
// Emails
// ---------------------------------------------------------------------------

fn collect_emails(doc: &Html) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut emails = Vec::new();

    let mut push = |candidate: &str| {
        let candidate = candidate.trim().trim_end_matches('.');
        if is_plausible_email(candidate) && seen.insert(candidate.to_lowercase()) {
            emails.push(candidate.to_string());
        }
    };

    for link in doc.select(&LINK_SEL) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        let Some(scheme) = href.get(..7) else {
            continue;
        };
        if !scheme.eq_ignore_ascii_case("mailto:") {
            continue;
        }
        let recipients = href[7..].split('?').next().unwrap_or_default();
        for addr in recipients.split(',') {
            push(addr.replace("%40", "@").as_str());
        }
    }

    for text in visible_text(doc) {
        for m in EMAIL_RE.find_iter(&text) {
            push(m.as_str());
        }
    }

    emails
}

fn is_plausible_email(candidate: &str) -> bool {
    let Some(m) = EMAIL_RE.find(candidate) else {
        return false;
    };
    if m.start() != 0 || m.end() != candidate.len() {
        return false;
    }

    let lower = candidate.to_lowercase();
    if ASSET_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return false;
    }

    let domain = lower.rsplit('@').next().unwrap_or_default();
    !PLACEHOLDER_DOMAINS
        .iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{d}")))
}

/// Text nodes outside `script`, `style`, `noscript`, and `template`.
fn visible_text(doc: &Html) -> Vec<String> {
    doc.tree
        .nodes()
        .filter_map(|node| match node.value() {
            Node::Text(text) => {
                let hidden = node.ancestors().any(|a| {
                    a.value().as_element().is_some_and(|e| {
                        matches!(e.name(), "script" | "style" | "noscript" | "template")
                    })
                });
                (!hidden).then(|| String::from(&**text))
            }
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Forms
// ---------------------------------------------------------------------------

/// A form with a message box or email field that is not a search box.
fn is_contact_form(form: ElementRef<'_>) -> bool {
    if form
        .value()
        .attr("role")
        .is_some_and(|r| r.eq_ignore_ascii_case("search"))
    {
        return false;
    }

    let is_search_input = |input: ElementRef<'_>| {
        let el = input.value();
        el.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("search"))
            || el
                .attr("name")
                .is_some_and(|n| SEARCH_FIELD_NAMES.iter().any(|s| n.eq_ignore_ascii_case(s)))
    };
    if form.select(&SEARCH_INPUT_SEL).any(is_search_input) {
        return false;
    }

    form.select(&CONTACT_FIELD_SEL).any(|field| {
        let el = field.value();
        el.name() == "textarea" || el.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("email"))
    })
}

fn form_action(form: ElementRef<'_>, base: &Url) -> Option<String> {
    let action = form.value().attr("action")?.trim();
    if action.is_empty()
        || action.starts_with('#')
        || action.to_ascii_lowercase().starts_with("javascript:")
    {
        return None;
    }

    let mut resolved = base.join(action).ok()?;
    resolved.set_fragment(None);
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}
