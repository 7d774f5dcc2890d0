use std::collections::HashSet;

use crate::contact::{clean_email, RawCandidate};
use crate::error::StoreError;
use crate::store::ContactStore;

/// Key used to decide a contact has been seen before.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Normalized email; the strong key, shared across sites.
    Email(String),
    /// The site's own id or profile URL.
    SourceRef { site: String, id: String },
    /// Normalized name + firm. Weak; only formed when a firm is known.
    NameFirm(String),
}

impl Identity {
    pub fn email(raw: &str) -> Option<Self> {
        clean_email(raw).map(Identity::Email)
    }

    pub fn name_firm(name: &str, firm: &str) -> Option<Self> {
        let name = normalize_words(name);
        let firm = normalize_words(firm);
        if name.is_empty() || firm.is_empty() {
            return None;
        }
        Some(Identity::NameFirm(format!("{}|{}", name, firm)))
    }

    pub fn key(&self) -> String {
        match self {
            Identity::Email(e) => format!("email:{}", e),
            Identity::SourceRef { site, id } => format!("ref:{}:{}", site, id),
            Identity::NameFirm(k) => format!("name:{}", k),
        }
    }

    /// Every identity derivable from a search-result row, strongest first.
    pub fn for_candidate(site: &str, candidate: &RawCandidate) -> Vec<Identity> {
        let mut ids = Vec::with_capacity(3);
        if let Some(email) = candidate.email.as_deref().and_then(Identity::email) {
            ids.push(email);
        }
        ids.push(Identity::SourceRef {
            site: site.to_string(),
            id: candidate.source_id.clone(),
        });
        if let Some(nf) = candidate
            .firm_guess
            .as_deref()
            .and_then(|firm| Identity::name_firm(&candidate.name, firm))
        {
            ids.push(nf);
        }
        ids
    }
}

fn normalize_words(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Answers "have we seen this contact?" from the run's own memory first,
/// then the persisted store. With `persist` off (dry runs) nothing is written.
pub struct Deduper<'a> {
    store: &'a dyn ContactStore,
    site: String,
    seen: HashSet<String>,
    persist: bool,
}

impl<'a> Deduper<'a> {
    pub fn new(store: &'a dyn ContactStore, site: &str, persist: bool) -> Self {
        Self {
            store,
            site: site.to_string(),
            seen: HashSet::new(),
            persist,
        }
    }

    pub fn is_known(&self, identity: &Identity) -> Result<bool, StoreError> {
        let key = identity.key();
        if self.seen.contains(&key) {
            return Ok(true);
        }
        if let Identity::Email(email) = identity {
            if self.store.exists(email)? {
                return Ok(true);
            }
        }
        self.store.is_known(&key)
    }

    pub fn mark_known(&mut self, identity: &Identity) -> Result<(), StoreError> {
        let key = identity.key();
        if self.persist {
            self.store.remember(&key, &self.site)?;
        }
        self.seen.insert(key);
        Ok(())
    }

    pub fn any_known(&self, identities: &[Identity]) -> Result<bool, StoreError> {
        for id in identities {
            if self.is_known(id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn mark_all(&mut self, identities: &[Identity]) -> Result<(), StoreError> {
        for id in identities {
            self.mark_known(id)?;
        }
        Ok(())
    }
}
