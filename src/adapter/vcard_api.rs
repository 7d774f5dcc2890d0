//! Directories with a JSON search API and a per-profile vCard download.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::HttpFetcher;
use super::{query_params, SearchPage, SiteAdapter};
use crate::contact::{clean_email, ContactDetail, RawCandidate};
use crate::error::AdapterError;
use crate::partition::PartitionKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcardApiConfig {
    pub base_url: String,
    pub search_path: String,
    /// `{id}` is replaced by the profile id.
    pub vcard_path: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_page_param")]
    pub page_param: String,
    #[serde(default = "default_page_size_param")]
    pub page_size_param: String,
    /// partition dimension → query parameter name
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Exclude vCard URLs that point back at the directory vendor.
    #[serde(default)]
    pub ignore_url_containing: Option<String>,
}

fn default_page_size() -> u32 {
    50
}
fn default_page_param() -> String {
    "page".into()
}
fn default_page_size_param() -> String {
    "pageSize".into()
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(alias = "totalCount", alias = "count")]
    total: Option<u32>,
    #[serde(alias = "items", alias = "profiles")]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(alias = "profileId")]
    id: serde_json::Value,
    #[serde(alias = "fullName", default)]
    name: String,
    #[serde(alias = "firmName", alias = "organization", default)]
    firm: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

pub struct VcardApiAdapter {
    site: String,
    config: VcardApiConfig,
    http: HttpFetcher,
}

impl VcardApiAdapter {
    pub fn new(site: &str, config: VcardApiConfig, http: HttpFetcher) -> Self {
        Self {
            site: site.to_string(),
            config,
            http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl SiteAdapter for VcardApiAdapter {
    fn site(&self) -> &str {
        &self.site
    }

    async fn search(&self, key: &PartitionKey, page: u32) -> Result<SearchPage, AdapterError> {
        let mut query = query_params(key, &self.config.params);
        query.push((self.config.page_param.clone(), page.to_string()));
        query.push((
            self.config.page_size_param.clone(),
            self.config.page_size.to_string(),
        ));

        let body = self.http.get_text(&self.url(&self.config.search_path), &query).await?;
        let parsed = parse_search_response(&body, page, self.config.page_size)?;
        debug!(site = %self.site, partition = %key, page, hits = parsed.candidates.len(), "search page");
        Ok(parsed)
    }

    async fn fetch_detail(&self, candidate: &RawCandidate) -> Result<ContactDetail, AdapterError> {
        let path = self.config.vcard_path.replace("{id}", &candidate.source_id);
        let url = self.url(&path);
        let text = self.http.get_text(&url, &[]).await?;
        let mut detail = parse_vcard(&text, self.config.ignore_url_containing.as_deref())?;
        detail.member_url = Some(url);
        Ok(detail)
    }
}

fn parse_search_response(body: &str, page: u32, page_size: u32) -> Result<SearchPage, AdapterError> {
    let resp: SearchResponse = serde_json::from_str(body)?;
    let returned = resp.results.len() as u32;

    let candidates = resp
        .results
        .into_iter()
        .map(|hit| {
            let id = match hit.id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            RawCandidate {
                source_id: id,
                name: hit.name.trim().to_string(),
                firm_guess: hit.firm.filter(|f| !f.trim().is_empty()),
                email: hit.email.as_deref().and_then(clean_email),
            }
        })
        .collect();

    let has_next_page = match resp.total {
        Some(total) => page.saturating_mul(page_size) < total && returned > 0,
        None => returned == page_size && returned > 0,
    };

    Ok(SearchPage {
        candidates,
        total_count: resp.total,
        has_next_page,
    })
}

/// Parse the handful of vCard 3.0 properties bar directories fill in.
pub fn parse_vcard(text: &str, ignore_url_containing: Option<&str>) -> Result<ContactDetail, AdapterError> {
    if !text.contains("BEGIN:VCARD") {
        return Err(AdapterError::Parse("response is not a vCard".into()));
    }

    let mut detail = ContactDetail::default();
    let mut full_name = String::new();

    for line in text.lines() {
        let line = line.trim();
        let Some((prop, value)) = line.split_once(':') else {
            continue;
        };
        let name = prop.split(';').next().unwrap_or("").to_ascii_uppercase();
        let params = prop.to_ascii_lowercase();

        match name.as_str() {
            "N" => {
                let mut parts = value.split(';');
                detail.last_name = parts.next().unwrap_or("").trim().to_string();
                detail.first_name = parts.next().unwrap_or("").trim().to_string();
            }
            "FN" => full_name = value.trim().to_string(),
            "EMAIL" => {
                if detail.email.is_none() {
                    detail.email = clean_email(value);
                }
            }
            "TEL" => {
                if detail.phone.is_empty() && (params.contains("voice") || params.contains("work")) {
                    detail.phone = value.trim().to_string();
                }
            }
            "ORG" => detail.firm_name = value.replace("\\,", ",").trim_end_matches(';').trim().to_string(),
            "URL" => {
                let skip = ignore_url_containing.is_some_and(|s| value.contains(s));
                if detail.website.is_empty() && value.starts_with("http") && !skip {
                    detail.website = value.trim().to_string();
                }
            }
            "ADR" => {
                if params.contains("work") || detail.city.is_empty() {
                    let parts: Vec<&str> = value.split(';').collect();
                    if parts.len() >= 6 {
                        detail.city = parts[3].trim().to_string();
                        detail.state = parts[4].trim().to_string();
                    }
                }
            }
            _ => {}
        }
    }

    if detail.first_name.is_empty() && detail.last_name.is_empty() && !full_name.is_empty() {
        let (first, last) = crate::contact::split_name(&full_name);
        detail.first_name = first;
        detail.last_name = last;
    }

    Ok(detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VCARD: &str = "BEGIN:VCARD\r\nVERSION:3.0\r\nN:Doe;Jane;Q;;\r\nFN:Jane Q. Doe\r\n\
ORG:Doe\\, Smith & Partners\r\nEMAIL;TYPE=work:JDoe@DoeSmith.com\r\n\
TEL;TYPE=work,voice:(616) 555-0100\r\nURL;TYPE=work:https://vendor.example/profile/9\r\n\
URL;TYPE=work:https://doesmith.com\r\nADR;TYPE=work:;;1 Main St;Grand Rapids;MI;49503;USA\r\nEND:VCARD\r\n";

    #[test]
    fn parses_vcard_fields() {
        let d = parse_vcard(VCARD, Some("vendor.example")).unwrap();
        assert_eq!(d.first_name, "Jane");
        assert_eq!(d.last_name, "Doe");
        assert_eq!(d.firm_name, "Doe, Smith & Partners");
        assert_eq!(d.email.as_deref(), Some("jdoe@doesmith.com"));
        assert_eq!(d.phone, "(616) 555-0100");
        assert_eq!(d.website, "https://doesmith.com");
        assert_eq!(d.city, "Grand Rapids");
        assert_eq!(d.state, "MI");
    }

    #[test]
    fn rejects_non_vcard() {
        assert!(matches!(
            parse_vcard("<html>login</html>", None),
            Err(AdapterError::Parse(_))
        ));
    }

    #[test]
    fn search_response_paging() {
        let body = r#"{"totalCount": 120, "items": [
            {"profileId": 17, "fullName": "Jane Doe", "firmName": "Doe Law"},
            {"id": "abc", "name": "John Roe", "firm": ""}
        ]}"#;
        let page = parse_search_response(body, 1, 50).unwrap();
        assert_eq!(page.total_count, Some(120));
        assert!(page.has_next_page);
        assert_eq!(page.candidates[0].source_id, "17");
        assert_eq!(page.candidates[0].firm_guess.as_deref(), Some("Doe Law"));
        assert_eq!(page.candidates[1].source_id, "abc");
        assert_eq!(page.candidates[1].firm_guess, None);

        let last = parse_search_response(body, 3, 50).unwrap();
        assert!(!last.has_next_page);
    }

    #[test]
    fn malformed_search_is_parse_error() {
        assert!(matches!(
            parse_search_response("{\"oops\": 1}", 1, 50),
            Err(AdapterError::Parse(_))
        ));
    }
}
