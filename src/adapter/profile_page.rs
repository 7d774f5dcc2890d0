//! Directories that render HTML result lists and one profile page per member.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::HttpFetcher;
use super::obfuscation::{decode_email, EmailStrategy};
use super::{query_params, SearchPage, SiteAdapter};
use crate::contact::{split_name, ContactDetail, RawCandidate};
use crate::error::{AdapterError, ConfigError};
use crate::partition::PartitionKey;

static TOTAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,]*)\s+(?:matches|results|attorneys|records)\b").unwrap()
});
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(?\d{3}\)?[\s.-]?\d{3}[\s.-]\d{4}").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePageConfig {
    pub base_url: String,
    pub search_path: String,
    #[serde(default = "default_page_param")]
    pub page_param: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// One element per result row.
    pub result_row_selector: String,
    /// Profile link inside a row; its text is the display name.
    pub profile_link_selector: String,
    #[serde(default)]
    pub result_firm_selector: Option<String>,
    #[serde(default)]
    pub next_page_selector: Option<String>,
    pub email_strategy: EmailStrategy,
    pub name_selector: String,
    #[serde(default)]
    pub firm_selector: Option<String>,
    #[serde(default)]
    pub phone_selector: Option<String>,
    #[serde(default)]
    pub website_selector: Option<String>,
    #[serde(default)]
    pub practice_area_selector: Option<String>,
    #[serde(default)]
    pub city_selector: Option<String>,
}

fn default_page_param() -> String {
    "page".into()
}

/// Compiled selectors, built once from the config.
struct Selectors {
    row: Selector,
    link: Selector,
    result_firm: Option<Selector>,
    next_page: Option<Selector>,
    name: Selector,
    firm: Option<Selector>,
    phone: Option<Selector>,
    website: Option<Selector>,
    practice_area: Option<Selector>,
    city: Option<Selector>,
}

fn compile(css: &str) -> Result<Selector, ConfigError> {
    Selector::parse(css).map_err(|e| ConfigError::Invalid(format!("bad selector '{}': {}", css, e)))
}

fn compile_opt(css: &Option<String>) -> Result<Option<Selector>, ConfigError> {
    css.as_deref().map(compile).transpose()
}

impl Selectors {
    fn new(c: &ProfilePageConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            row: compile(&c.result_row_selector)?,
            link: compile(&c.profile_link_selector)?,
            result_firm: compile_opt(&c.result_firm_selector)?,
            next_page: compile_opt(&c.next_page_selector)?,
            name: compile(&c.name_selector)?,
            firm: compile_opt(&c.firm_selector)?,
            phone: compile_opt(&c.phone_selector)?,
            website: compile_opt(&c.website_selector)?,
            practice_area: compile_opt(&c.practice_area_selector)?,
            city: compile_opt(&c.city_selector)?,
        })
    }
}

pub struct ProfilePageAdapter {
    site: String,
    config: ProfilePageConfig,
    selectors: Selectors,
    http: HttpFetcher,
}

impl ProfilePageAdapter {
    pub fn new(site: &str, config: ProfilePageConfig, http: HttpFetcher) -> Result<Self, ConfigError> {
        let selectors = Selectors::new(&config)?;
        Ok(Self {
            site: site.to_string(),
            config,
            selectors,
            http,
        })
    }

    fn absolute(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            return href.to_string();
        }
        match url::Url::parse(&self.config.base_url).and_then(|base| base.join(href)) {
            Ok(u) => u.to_string(),
            Err(_) => format!("{}{}", self.config.base_url.trim_end_matches('/'), href),
        }
    }

    // Html is not Send; keep parsing out of the async bodies.
    fn parse_results(&self, html: &str) -> Result<SearchPage, AdapterError> {
        let doc = Html::parse_document(html);
        let mut candidates = Vec::new();

        for row in doc.select(&self.selectors.row) {
            let Some(link) = row.select(&self.selectors.link).next() else {
                continue;
            };
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let name = text_of(link);
            if name.is_empty() {
                continue;
            }
            let firm_guess = self
                .selectors
                .result_firm
                .as_ref()
                .and_then(|s| row.select(s).next())
                .map(text_of)
                .filter(|f| !f.is_empty());
            candidates.push(RawCandidate {
                source_id: self.absolute(href),
                name,
                firm_guess,
                email: None,
            });
        }

        let body_text: String = doc.root_element().text().collect::<Vec<_>>().join(" ");
        let total_count = TOTAL_RE
            .captures(&body_text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().replace(',', "").parse().ok());

        if candidates.is_empty() && total_count.unwrap_or(0) > 0 {
            return Err(AdapterError::Parse(format!(
                "page claims {:?} results but no rows matched '{}'",
                total_count, self.config.result_row_selector
            )));
        }

        let has_next_page = match &self.selectors.next_page {
            Some(sel) => doc.select(sel).next().is_some(),
            None => false,
        };

        Ok(SearchPage {
            candidates,
            total_count,
            has_next_page,
        })
    }

    fn parse_profile(&self, html: &str) -> Result<ContactDetail, AdapterError> {
        let doc = Html::parse_document(html);
        let s = &self.selectors;

        let full_name = doc
            .select(&s.name)
            .next()
            .map(text_of)
            .ok_or_else(|| AdapterError::Parse("profile has no name element".into()))?;
        let (first_name, last_name) = split_name(&full_name);

        let first = |sel: &Option<Selector>| -> String {
            sel.as_ref()
                .and_then(|sel| doc.select(sel).next())
                .map(text_of)
                .unwrap_or_default()
        };

        let phone_text = first(&s.phone);
        let phone = PHONE_RE
            .find(&phone_text)
            .map(|m| m.as_str().to_string())
            .unwrap_or(phone_text);

        let website = s
            .website
            .as_ref()
            .and_then(|sel| doc.select(sel).next())
            .and_then(|el| el.value().attr("href").map(str::to_string).or_else(|| Some(text_of(el))))
            .filter(|w| w.starts_with("http"))
            .unwrap_or_default();

        let practice_areas = s
            .practice_area
            .as_ref()
            .map(|sel| {
                doc.select(sel)
                    .map(text_of)
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(ContactDetail {
            email: decode_email(self.config.email_strategy, html, &doc),
            first_name,
            last_name,
            firm_name: first(&s.firm),
            phone,
            website,
            city: first(&s.city),
            state: String::new(),
            practice_areas,
            member_url: None,
        })
    }
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl SiteAdapter for ProfilePageAdapter {
    fn site(&self) -> &str {
        &self.site
    }

    async fn search(&self, key: &PartitionKey, page: u32) -> Result<SearchPage, AdapterError> {
        let mut query = query_params(key, &self.config.params);
        query.push((self.config.page_param.clone(), page.to_string()));
        let url = self.absolute(&self.config.search_path);
        let html = self.http.get_text(&url, &query).await?;
        let parsed = self.parse_results(&html)?;
        debug!(site = %self.site, partition = %key, page, hits = parsed.candidates.len(), total = ?parsed.total_count, "search page");
        Ok(parsed)
    }

    async fn fetch_detail(&self, candidate: &RawCandidate) -> Result<ContactDetail, AdapterError> {
        let html = self.http.get_text(&candidate.source_id, &[]).await?;
        let mut detail = self.parse_profile(&html)?;
        detail.member_url = Some(candidate.source_id.clone());
        Ok(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(strategy: EmailStrategy) -> ProfilePageAdapter {
        let config = ProfilePageConfig {
            base_url: "https://bar.example.org".into(),
            search_path: "/find-a-lawyer".into(),
            page_param: "page".into(),
            params: BTreeMap::new(),
            result_row_selector: "tr.result".into(),
            profile_link_selector: "a.profile".into(),
            result_firm_selector: Some("td.firm".into()),
            next_page_selector: Some("a.next".into()),
            email_strategy: strategy,
            name_selector: "h1.name".into(),
            firm_selector: Some(".firm".into()),
            phone_selector: Some(".phone".into()),
            website_selector: Some("a.website".into()),
            practice_area_selector: Some("ul.areas li".into()),
            city_selector: None,
        };
        ProfilePageAdapter::new("testbar", config, HttpFetcher::new().unwrap()).unwrap()
    }

    #[test]
    fn parses_result_rows_and_total() {
        let html = r#"<html><body><h3>Search Results - 1,234 matches</h3><table>
            <tr class="result"><td><a class="profile" href="/member/17">Jane  Doe</a></td><td class="firm">Doe Law</td></tr>
            <tr class="result"><td><a class="profile" href="https://bar.example.org/member/18">John Roe</a></td><td class="firm"></td></tr>
            <tr class="result"><td>no link here</td></tr>
            </table><a class="next" href="?page=2">Next</a></body></html>"#;
        let page = adapter(EmailStrategy::Mailto).parse_results(html).unwrap();
        assert_eq!(page.total_count, Some(1234));
        assert!(page.has_next_page);
        assert_eq!(page.candidates.len(), 2);
        assert_eq!(page.candidates[0].source_id, "https://bar.example.org/member/17");
        assert_eq!(page.candidates[0].name, "Jane Doe");
        assert_eq!(page.candidates[0].firm_guess.as_deref(), Some("Doe Law"));
        assert_eq!(page.candidates[1].firm_guess, None);
    }

    #[test]
    fn rows_missing_when_total_claimed_is_parse_error() {
        let html = "<html><body>42 results<div>layout changed</div></body></html>";
        assert!(matches!(
            adapter(EmailStrategy::Mailto).parse_results(html),
            Err(AdapterError::Parse(_))
        ));
    }

    #[test]
    fn parses_profile_with_char_shift_email() {
        // "jdoe" shifted by 1 over a-z
        let html = r#"<html><body><h1 class="name">Hon. Jane Doe</h1>
            <div class="firm">Doe &amp; Partners</div><div class="phone">Phone: (402) 555-0199</div>
            <a class="website" href="https://doelaw.com">site</a>
            <ul class="areas"><li>Personal Injury</li><li>Family Law</li></ul>
            <script>CharShiftDecrypt('kepf@epfmbx.dpn', 1, 'abcdefghijklmnopqrstuvwxyz')</script>
            </body></html>"#;
        let d = adapter(EmailStrategy::CharShift).parse_profile(html).unwrap();
        assert_eq!(d.first_name, "Jane");
        assert_eq!(d.last_name, "Doe");
        assert_eq!(d.firm_name, "Doe & Partners");
        assert_eq!(d.phone, "(402) 555-0199");
        assert_eq!(d.website, "https://doelaw.com");
        assert_eq!(d.practice_areas, vec!["Personal Injury", "Family Law"]);
        assert_eq!(d.email.as_deref(), Some("jdoe@doelaw.com"));
    }

    #[test]
    fn profile_without_name_is_parse_error() {
        assert!(adapter(EmailStrategy::Mailto)
            .parse_profile("<html><body>Access denied</body></html>")
            .is_err());
    }
}
