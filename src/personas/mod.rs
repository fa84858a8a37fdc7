//! Persona library
//!
//! Read-only catalog of expert profiles. Loaded once at process startup
//! from a static JSON descriptor embedded in the binary and parsed behind
//! a `OnceLock`, the modernized form of a `lazy_static!` global. Nothing
//! in the engine ever mutates a `PersonaProfile` after load; identity is
//! the profile's `code`.

use std::sync::OnceLock;

use crate::domain::PersonaProfile;

const PERSONAS_JSON: &str = include_str!("../../assets/personas.json");

static CATALOG: OnceLock<Vec<PersonaProfile>> = OnceLock::new();

fn load_catalog() -> Vec<PersonaProfile> {
    serde_json::from_str(PERSONAS_JSON).expect("assets/personas.json is malformed")
}

/// Read-only handle onto the global persona catalog.
pub struct PersonaLibrary;

impl PersonaLibrary {
    pub fn new() -> Self {
        Self
    }

    fn catalog(&self) -> &'static [PersonaProfile] {
        CATALOG.get_or_init(load_catalog)
    }

    /// The full catalog, in file order.
    pub fn all(&self) -> &'static [PersonaProfile] {
        self.catalog()
    }

    pub fn by_code(&self, code: &str) -> Option<&'static PersonaProfile> {
        self.catalog().iter().find(|p| p.code == code)
    }

    /// Profiles whose `domain_expertise` intersects any of `tags`, ranked
    /// by the number of matching tags (most relevant first). Ties keep
    /// catalog order.
    pub fn by_expertise(&self, tags: &[String]) -> Vec<&'static PersonaProfile> {
        if tags.is_empty() {
            return self.catalog().iter().collect();
        }
        let mut scored: Vec<(usize, &'static PersonaProfile)> = self
            .catalog()
            .iter()
            .map(|p| {
                let score = p
                    .domain_expertise
                    .iter()
                    .filter(|e| tags.iter().any(|t| t.eq_ignore_ascii_case(e)))
                    .count();
                (score, p)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, p)| p).collect()
    }
}

impl Default for PersonaLibrary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_exactly_45_entries() {
        let lib = PersonaLibrary::new();
        assert_eq!(lib.all().len(), 45);
    }

    #[test]
    fn all_codes_are_unique() {
        let lib = PersonaLibrary::new();
        let mut codes: Vec<&str> = lib.all().iter().map(|p| p.code.as_str()).collect();
        codes.sort();
        let before = codes.len();
        codes.dedup();
        assert_eq!(before, codes.len());
    }

    #[test]
    fn by_expertise_ranks_matches_first() {
        let lib = PersonaLibrary::new();
        let hits = lib.by_expertise(&["pricing strategy".to_string()]);
        assert!(!hits.is_empty());
        assert!(hits[0].domain_expertise.iter().any(|e| e == "pricing strategy"));
    }

    #[test]
    fn by_expertise_empty_tags_returns_full_catalog() {
        let lib = PersonaLibrary::new();
        assert_eq!(lib.by_expertise(&[]).len(), 45);
    }

    #[test]
    fn by_code_finds_known_persona() {
        let lib = PersonaLibrary::new();
        assert!(lib.by_code("cfo_advisor").is_some());
        assert!(lib.by_code("not_a_real_code").is_none());
    }
}
