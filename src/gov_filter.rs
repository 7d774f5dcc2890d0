//! Government / institutional contact filter.
//!
//! Precision over recall: a false exclusion only costs a lead, a false
//! inclusion means mailing a court or a prosecutor's office.

use std::sync::LazyLock;

use regex::Regex;

static GOV_EMAIL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\.gov$",
        r"\.gov\.",
        r"\.state\.\w+$",
        r"\.\w{2}\.us$",
        r"\.mil$",
        r"\.mil\.",
        r"@.*county",
        r"@.*\.co\.\w{2}\.",
        r"@courts?\.",
        r"@.*judicial",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

struct FirmPattern {
    pattern: Regex,
    exclude: Option<Regex>,
}

fn firm(pattern: &str) -> FirmPattern {
    FirmPattern {
        pattern: Regex::new(&format!("(?i){}", pattern)).unwrap(),
        exclude: None,
    }
}

fn firm_except(pattern: &str, exclude: &str) -> FirmPattern {
    FirmPattern {
        pattern: Regex::new(&format!("(?i){}", pattern)).unwrap(),
        exclude: Some(Regex::new(&format!("(?i){}", exclude)).unwrap()),
    }
}

static GOV_FIRM_PATTERNS: LazyLock<Vec<FirmPattern>> = LazyLock::new(|| {
    vec![
        // Social Security
        firm(r"social security"),
        firm(r"\bssa\b"),
        // Public defenders
        firm(r"public defender"),
        firm(r"indigent defense"),
        firm(r"assigned counsel"),
        // Legal aid
        firm(r"legal aid"),
        firm(r"legal services corporation"),
        // Prosecutors
        firm(r"district attorney"),
        firm(r"\bda\s*office\b"),
        firm(r"\bda\s*'?s\s*office\b"),
        firm(r"prosecutor"),
        firm(r"state attorney"),
        firm(r"solicitor general"),
        firm(r"commonwealth attorney"),
        firm_except(r"county attorney", r"county attorney'?s fee"),
        // Attorney general
        firm(r"attorney general"),
        firm(r"\bag\s*office\b"),
        // Agencies
        firm(r"\bdepartment of\b"),
        firm(r"^state of\s"),
        firm(r"^county of\s"),
        firm(r"^city of\s"),
        firm(r"^town of\s"),
        firm(r"^village of\s"),
        firm(r"\bstate\s+government\b"),
        firm(r"\bfederal\s+government\b"),
        // Courts
        firm_except(
            r"\bcourt\b",
            r"courtney|courthouse|courtland|courtyard|court\s*house|court\s*yard|courtside|food\s*court",
        ),
        firm(r"\bjudicial\b"),
        firm(r"\bmagistrate\b"),
        firm_except(r"\bjudge\b", r"judge\s+advocate"),
        firm(r"\bclerk of\b"),
        // Military
        firm(r"\bu\.?s\.?\s*(army|navy|air force|marine|coast guard)"),
        firm(r"\bmilitary\s+(legal|law)"),
        firm(r"\bjag\s*(corps|office)\b"),
        firm(r"armed forces"),
        // Veterans
        firm(r"veterans?\s*(admin|affairs|administration)"),
        firm(r"\bva\s*(hospital|medical|healthcare|regional)"),
        firm(r"\bdva\b"),
        // Federal agencies
        firm(r"\birs\b"),
        firm(r"internal revenue"),
        firm(r"\bfbi\b"),
        firm(r"\bdoj\b"),
        firm(r"\bdhs\b"),
        firm_except(r"\bice\b", r"\bice\s*cream"),
        firm(r"\buscis\b"),
        firm(r"homeland security"),
        firm(r"\bftc\b"),
        firm_except(r"\bsec\b", r"\bsec\s*(and|tion|urity)"),
        firm(r"\bepa\b"),
        firm(r"\bhud\b"),
        firm(r"\beeoc\b"),
        firm(r"\bnlrb\b"),
        firm(r"\bosha\b"),
        // Education
        firm(r"\bschool\s*(district|board)\b"),
        firm(r"\bpublic\s*schools?\b"),
        firm_except(r"\buniversity\b", r"\buniversity\s*(of\s+)?(law|legal)"),
        // Corrections
        firm(r"\bprison\b"),
        firm(r"\bcorrections?\b"),
        firm(r"\bpenitentiary\b"),
        firm(r"\bjail\b"),
        firm(r"\bdetention\s*center\b"),
    ]
});

pub fn is_government_email(email: &str) -> bool {
    if email.is_empty() {
        return false;
    }
    let lower = email.to_lowercase();
    GOV_EMAIL_PATTERNS.iter().any(|re| re.is_match(&lower))
}

pub fn is_government_firm(firm_name: &str) -> bool {
    if firm_name.trim().is_empty() {
        return false;
    }
    GOV_FIRM_PATTERNS.iter().any(|p| {
        p.pattern.is_match(firm_name)
            && !p.exclude.as_ref().is_some_and(|ex| ex.is_match(firm_name))
    })
}

/// True when either the email domain or the firm name marks an institutional contact.
pub fn is_government_contact(email: &str, firm_name: &str) -> bool {
    is_government_email(email) || is_government_firm(firm_name)
}

static CAT_STATE_EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.state\.|\.\w{2}\.us$").unwrap());
static CAT_PUBLIC_DEFENDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"public defender|indigent defense").unwrap());
static CAT_PROSECUTOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"district attorney|prosecutor|state attorney").unwrap());
static CAT_COURT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bcourt\b").unwrap());
static CAT_AGENCY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"department of|^state of|^county of|^city of").unwrap());
static CAT_MILITARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(army|navy|air force|marine|military)\b").unwrap());

/// Category label for a government contact, used in logs. `None` when not government.
pub fn government_category(email: &str, firm_name: &str) -> Option<&'static str> {
    let email = email.to_lowercase();
    let firm = firm_name.to_lowercase();

    if email.ends_with(".gov") {
        return Some("federal_gov");
    }
    if email.ends_with(".mil") {
        return Some("military");
    }
    if CAT_STATE_EMAIL.is_match(&email) {
        return Some("state_gov");
    }
    if email.split('@').nth(1).is_some_and(|d| d.contains("county")) {
        return Some("county_gov");
    }
    if email.contains("@court.") || email.contains("@courts.") {
        return Some("court");
    }

    if firm.contains("social security") || firm.split_whitespace().any(|w| w == "ssa") {
        return Some("ssa");
    }
    if CAT_PUBLIC_DEFENDER.is_match(&firm) {
        return Some("public_defender");
    }
    if firm.contains("legal aid") {
        return Some("legal_aid");
    }
    if CAT_PROSECUTOR.is_match(&firm) {
        return Some("prosecutor");
    }
    if firm.contains("attorney general") {
        return Some("attorney_general");
    }
    if CAT_COURT.is_match(&firm) && !firm.contains("courtney") && !firm.contains("courthouse") {
        return Some("court");
    }
    if CAT_AGENCY.is_match(&firm) {
        return Some("govt_agency");
    }
    if firm.contains("veterans") || firm.starts_with("va ") {
        return Some("va");
    }
    if CAT_MILITARY.is_match(&firm) {
        return Some("military");
    }

    if is_government_contact(&email, firm_name) {
        return Some("other_govt");
    }
    None
}
