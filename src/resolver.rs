//! Fuzzy company name resolution against the registry.
//!
//! Classified updates name companies however the sender wrote them
//! ("ACME", "Acme Inc.", "Acme Letter — May"). Resolution runs a fixed
//! pipeline of increasingly loose tiers and stops at the first hit. This
//! is a deliberately cheap containment heuristic, not edit-distance
//! matching; each tier is tagged on the result so callers (and tests) can
//! see which one fired.
//!
//! Registry maintenance lives here too: [`dedupe_companies`] merges
//! companies that share the same suffix-stripped name, since they are
//! the rows this resolver would conflate anyway.

use std::collections::BTreeMap;

use crate::db::{DbCompany, DbError, TrackerDb};

/// Legal suffixes stripped before tier 2/3 comparison. Matched as whole
/// words, with an optional trailing period.
const LEGAL_SUFFIXES: &[&str] = &["inc", "llc", "corp", "corporation", "ltd"];

/// Which tier of the match pipeline produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    /// Case-insensitive exact match on the stored name.
    Exact,
    /// Exact match after stripping legal suffixes from both sides.
    SuffixStrippedExact,
    /// Suffix-stripped substring containment, either direction.
    SuffixStrippedContains,
    /// Raw substring containment on the original names, either direction.
    RawContains,
}

/// A resolved company plus the tier that matched it.
#[derive(Debug, Clone, Copy)]
pub struct CompanyMatch<'a> {
    pub company: &'a DbCompany,
    pub tier: MatchTier,
}

/// Lowercase and drop legal suffixes ("Acme Inc." → "acme").
pub fn strip_legal_suffixes(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut words: Vec<&str> = Vec::new();
    for word in lowered.split_whitespace() {
        let bare = word.trim_end_matches('.');
        if LEGAL_SUFFIXES.contains(&bare) {
            continue;
        }
        words.push(word);
    }
    words.join(" ").trim().to_string()
}

/// Resolve a candidate name against the registry. First tier to hit wins;
/// within a tier, registry order breaks ties.
pub fn resolve<'a>(candidate: &str, registry: &'a [DbCompany]) -> Option<CompanyMatch<'a>> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }

    let cand_lower = candidate.to_lowercase();
    let cand_stripped = strip_legal_suffixes(candidate);

    // Tier 1: case-insensitive exact
    for company in registry {
        if company.name.to_lowercase() == cand_lower {
            return Some(CompanyMatch {
                company,
                tier: MatchTier::Exact,
            });
        }
    }

    // Tier 2: suffix-stripped exact
    if !cand_stripped.is_empty() {
        for company in registry {
            if strip_legal_suffixes(&company.name) == cand_stripped {
                return Some(CompanyMatch {
                    company,
                    tier: MatchTier::SuffixStrippedExact,
                });
            }
        }

        // Tier 3: suffix-stripped containment, either direction
        for company in registry {
            let stored = strip_legal_suffixes(&company.name);
            if stored.is_empty() {
                continue;
            }
            if stored.contains(&cand_stripped) || cand_stripped.contains(&stored) {
                return Some(CompanyMatch {
                    company,
                    tier: MatchTier::SuffixStrippedContains,
                });
            }
        }
    }

    // Tier 4: raw containment on the original names. Last resort; can
    // false-positive on very short names.
    for company in registry {
        let stored_lower = company.name.to_lowercase();
        if stored_lower.contains(&cand_lower) || cand_lower.contains(&stored_lower) {
            return Some(CompanyMatch {
                company,
                tier: MatchTier::RawContains,
            });
        }
    }

    None
}

// =============================================================================
// Registry dedup
// =============================================================================

/// Outcome of one registry dedup pass.
#[derive(Debug, Default)]
pub struct DedupeStats {
    pub groups: usize,
    pub merged: usize,
}

/// How much identifying data a company row carries. Used to pick which
/// duplicate survives a merge.
fn completeness(company: &DbCompany) -> usize {
    [
        company.legal_name.is_some(),
        company.website.is_some(),
        company.description.is_some(),
        company.founders.is_some(),
        company.fund.is_some(),
    ]
    .iter()
    .filter(|present| **present)
    .count()
}

/// Merge companies whose names collapse to the same suffix-stripped key
/// ("Acme" / "Acme Inc." / "ACME"). Within a group the most complete row
/// survives; ties go to the oldest. A portfolio flag anywhere in the
/// group sticks to the survivor. With `dry_run` the pass only reports
/// what it would merge.
pub fn dedupe_companies(db: &TrackerDb, dry_run: bool) -> Result<DedupeStats, DbError> {
    let mut groups: BTreeMap<String, Vec<DbCompany>> = BTreeMap::new();
    for company in db.list_companies()? {
        let mut key = strip_legal_suffixes(&company.name);
        if key.is_empty() {
            key = company.name.trim().to_lowercase();
        }
        groups.entry(key).or_default().push(company);
    }

    let mut stats = DedupeStats::default();
    for (_, mut group) in groups {
        if group.len() <= 1 {
            continue;
        }
        stats.groups += 1;

        group.sort_by_key(|c| (std::cmp::Reverse(completeness(c)), c.id));
        let keeper = group[0].clone();
        let any_portfolio = group.iter().any(|c| c.is_portfolio);

        for dupe in &group[1..] {
            log::info!(
                "{}Merging duplicate {} (id {}) into {} (id {})",
                if dry_run { "[dry-run] " } else { "" },
                dupe.name,
                dupe.id,
                keeper.name,
                keeper.id
            );
            stats.merged += 1;
            if !dry_run {
                db.merge_company(dupe.id, keeper.id)?;
            }
        }
        if !dry_run && any_portfolio && !keeper.is_portfolio {
            db.set_portfolio(keeper.id, true)?;
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company(id: i64, name: &str) -> DbCompany {
        DbCompany {
            id,
            name: name.to_string(),
            legal_name: None,
            website: None,
            fund: None,
            description: None,
            founders: None,
            is_portfolio: true,
            last_update_at: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_exact_case_insensitive() {
        let registry = vec![company(1, "Validic")];
        let m = resolve("VALIDIC", &registry).unwrap();
        assert_eq!(m.company.id, 1);
        assert_eq!(m.tier, MatchTier::Exact);
    }

    #[test]
    fn test_suffix_stripped_exact() {
        let registry = vec![company(1, "Acme Inc.")];
        let m = resolve("ACME", &registry).unwrap();
        assert_eq!(m.company.id, 1);
        assert_eq!(m.tier, MatchTier::SuffixStrippedExact);
    }

    #[test]
    fn test_suffix_stripped_exact_candidate_side() {
        let registry = vec![company(1, "Equity Shift")];
        let m = resolve("Equity Shift Inc.", &registry).unwrap();
        assert_eq!(m.company.id, 1);
        assert_eq!(m.tier, MatchTier::SuffixStrippedExact);
    }

    #[test]
    fn test_containment_after_stripping() {
        let registry = vec![company(1, "Trayecto Inc")];
        let m = resolve("Trayecto Letter", &registry).unwrap();
        assert_eq!(m.company.id, 1);
        assert_eq!(m.tier, MatchTier::SuffixStrippedContains);
    }

    #[test]
    fn test_raw_containment_last_resort() {
        // "Corp" is a legal suffix, so stripping "NovaCorp" leaves it
        // intact (single word, not a suffix word) — but a candidate that
        // only matches with the suffix present exercises tier 4.
        let registry = vec![company(1, "Redwood Capital Corp")];
        let m = resolve("capital corp", &registry).unwrap();
        assert_eq!(m.company.id, 1);
    }

    #[test]
    fn test_no_match() {
        let registry = vec![company(1, "Acme Inc"), company(2, "Validic")];
        assert!(resolve("Completely Unrelated Co", &registry).is_none());
        assert!(resolve("", &registry).is_none());
    }

    #[test]
    fn test_first_tier_wins_over_later_registry_entries() {
        let registry = vec![company(1, "Acme Holdings"), company(2, "Acme")];
        // Tier 1 exact match on id=2 must beat tier 3 containment on id=1.
        let m = resolve("acme", &registry).unwrap();
        assert_eq!(m.company.id, 2);
        assert_eq!(m.tier, MatchTier::Exact);
    }

    fn test_db() -> TrackerDb {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("resolver_test.db");
        std::mem::forget(dir);
        TrackerDb::open_at(path).expect("open")
    }

    #[test]
    fn test_dedupe_merges_suffix_variants_into_most_complete() {
        let db = test_db();
        let keep = db
            .insert_company("Acme", false, Some("Fund II"))
            .expect("insert");
        let dupe = db.insert_company("Acme Inc.", true, None).expect("insert");
        db.insert_company("Validic", true, None).expect("insert");
        db.insert_contact(dupe, None, "founder@acme.example", None, true)
            .expect("contact");

        let stats = dedupe_companies(&db, false).expect("dedupe");
        assert_eq!(stats.groups, 1);
        assert_eq!(stats.merged, 1);

        let companies = db.list_companies().expect("list");
        assert_eq!(companies.len(), 2);
        let survivor = db.get_company(keep).expect("get").expect("present");
        assert_eq!(survivor.name, "Acme");
        // The duplicate's portfolio flag and contact follow the survivor
        assert!(survivor.is_portfolio);
        assert_eq!(db.contacts_for_company(keep).expect("contacts").len(), 1);
    }

    #[test]
    fn test_dedupe_dry_run_changes_nothing() {
        let db = test_db();
        db.insert_company("Acme", true, None).expect("insert");
        db.insert_company("Acme LLC", true, None).expect("insert");

        let stats = dedupe_companies(&db, true).expect("dedupe");
        assert_eq!(stats.merged, 1);
        assert_eq!(db.list_companies().expect("list").len(), 2);
    }

    #[test]
    fn test_strip_legal_suffixes() {
        assert_eq!(strip_legal_suffixes("Acme Inc."), "acme");
        assert_eq!(strip_legal_suffixes("Acme Corporation"), "acme");
        assert_eq!(strip_legal_suffixes("Data Systems LLC"), "data systems");
        assert_eq!(strip_legal_suffixes("Acme Holdings Inc. LLC"), "acme holdings");
        assert_eq!(strip_legal_suffixes("Validic"), "validic");
    }
}
