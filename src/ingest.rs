use chrono::Utc;
use tracing::{debug, info};

use crate::contact::{clean_email, normalize_state, split_name, ContactDetail, ContactRecord, RawCandidate};
use crate::error::StoreError;
use crate::gov_filter::{government_category, is_government_contact};
use crate::store::ContactStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted(String),
    /// Email already in the store (possibly from another site).
    Duplicate(String),
    Government(&'static str),
    NoEmail,
}

/// Turns an enriched candidate into a `ContactRecord` and persists it.
pub struct Ingestor<'a> {
    store: &'a dyn ContactStore,
    site: String,
    default_state: String,
    dry_run: bool,
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a dyn ContactStore, site: &str, default_state: &str, dry_run: bool) -> Self {
        Self {
            store,
            site: site.to_string(),
            default_state: default_state.to_string(),
            dry_run,
        }
    }

    pub fn build_record(
        &self,
        candidate: &RawCandidate,
        detail: &ContactDetail,
        practice_area: Option<&str>,
    ) -> Option<ContactRecord> {
        let email = detail
            .email
            .as_deref()
            .or(candidate.email.as_deref())
            .and_then(clean_email)?;

        let (first_name, last_name) = if detail.first_name.is_empty() && detail.last_name.is_empty() {
            split_name(&candidate.name)
        } else {
            (detail.first_name.clone(), detail.last_name.clone())
        };

        let firm_name = if detail.firm_name.is_empty() {
            candidate.firm_guess.clone().unwrap_or_default()
        } else {
            detail.firm_name.clone()
        };

        let mut practice_areas = detail.practice_areas.clone();
        if let Some(area) = practice_area {
            if !practice_areas.iter().any(|a| a == area) {
                practice_areas.push(area.to_string());
            }
        }

        Some(ContactRecord {
            email,
            first_name,
            last_name,
            firm_name,
            phone: detail.phone.clone(),
            website: detail.website.clone(),
            practice_areas,
            city: detail.city.clone(),
            state: normalize_state(&detail.state, &self.default_state),
            source: self.site.clone(),
            source_ref: candidate.source_id.clone(),
            member_url: detail.member_url.clone(),
            created_at: Utc::now(),
        })
    }

    pub fn ingest(
        &self,
        candidate: &RawCandidate,
        detail: &ContactDetail,
        practice_area: Option<&str>,
    ) -> Result<IngestOutcome, StoreError> {
        let Some(record) = self.build_record(candidate, detail, practice_area) else {
            debug!(site = %self.site, candidate = %candidate.name, "no usable email");
            return Ok(IngestOutcome::NoEmail);
        };

        if is_government_contact(&record.email, &record.firm_name) {
            let category = government_category(&record.email, &record.firm_name).unwrap_or("other_govt");
            debug!(site = %self.site, email = %record.email, category, "government contact filtered");
            return Ok(IngestOutcome::Government(category));
        }

        if self.store.exists(&record.email)? {
            return Ok(IngestOutcome::Duplicate(record.email));
        }

        if self.dry_run {
            info!(site = %self.site, email = %record.email, "[dry run] would insert");
            return Ok(IngestOutcome::Inserted(record.email));
        }

        if self.store.insert(&record)? {
            info!(
                site = %self.site,
                email = %record.email,
                firm = %record.firm_name,
                "inserted {} {}",
                record.first_name,
                record.last_name
            );
            Ok(IngestOutcome::Inserted(record.email))
        } else {
            Ok(IngestOutcome::Duplicate(record.email))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;

    fn detail(email: &str, firm: &str) -> ContactDetail {
        ContactDetail {
            email: Some(email.into()),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            firm_name: firm.into(),
            state: "Kentucky".into(),
            ..ContactDetail::default()
        }
    }

    #[test]
    fn inserts_once() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ing = Ingestor::new(&store, "kybar", "KY", false);
        let c = RawCandidate::new("17", "Jane Doe");
        let d = detail("Jane@DoeLaw.com", "Doe Law");

        assert_eq!(
            ing.ingest(&c, &d, Some("Personal Injury")).unwrap(),
            IngestOutcome::Inserted("jane@doelaw.com".into())
        );
        assert_eq!(
            ing.ingest(&c, &d, None).unwrap(),
            IngestOutcome::Duplicate("jane@doelaw.com".into())
        );
    }

    #[test]
    fn filters_government_after_enrichment() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ing = Ingestor::new(&store, "kybar", "KY", false);
        let c = RawCandidate::new("17", "Jane Doe");
        let out = ing
            .ingest(&c, &detail("jdoe@firm.com", "Office of the Public Defender"), None)
            .unwrap();
        assert_eq!(out, IngestOutcome::Government("public_defender"));
        assert!(!store.exists("jdoe@firm.com").unwrap());
    }

    #[test]
    fn missing_email_is_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ing = Ingestor::new(&store, "kybar", "KY", false);
        let d = ContactDetail::default();
        assert_eq!(
            ing.ingest(&RawCandidate::new("1", "X"), &d, None).unwrap(),
            IngestOutcome::NoEmail
        );
    }

    #[test]
    fn record_falls_back_to_candidate_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ing = Ingestor::new(&store, "kybar", "KY", false);
        let c = RawCandidate::new("17", "Doe, John").with_firm("Roe & Doe");
        let d = ContactDetail {
            email: Some("john@roedoe.com".into()),
            ..ContactDetail::default()
        };
        let r = ing.build_record(&c, &d, Some("Family Law")).unwrap();
        assert_eq!(r.first_name, "John");
        assert_eq!(r.last_name, "Doe");
        assert_eq!(r.firm_name, "Roe & Doe");
        assert_eq!(r.state, "KY");
        assert_eq!(r.practice_areas, vec!["Family Law"]);
        assert_eq!(r.source, "kybar");
    }

    #[test]
    fn dry_run_writes_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ing = Ingestor::new(&store, "kybar", "KY", true);
        let out = ing
            .ingest(&RawCandidate::new("17", "Jane Doe"), &detail("a@b.com", ""), None)
            .unwrap();
        assert!(matches!(out, IngestOutcome::Inserted(_)));
        assert!(!store.exists("a@b.com").unwrap());
    }
}
