//! Turns a raw identifier into ordered candidate lookup keys.

use std::fmt;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// One interpretation of a raw identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CandidateKey {
    /// The raw value parsed as a canonical id
    CanonicalId(Uuid),
    /// The raw value as typed, matched against slug-like fields
    Slug(String),
    /// Lowercased, accent-stripped, hyphenated form of the raw value
    NormalizedName(String),
}

impl CandidateKey {
    pub fn kind(&self) -> &'static str {
        match self {
            CandidateKey::CanonicalId(_) => "canonical_id",
            CandidateKey::Slug(_) => "slug",
            CandidateKey::NormalizedName(_) => "normalized_name",
        }
    }
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateKey::CanonicalId(id) => write!(f, "{}:{}", self.kind(), id),
            CandidateKey::Slug(s) | CandidateKey::NormalizedName(s) => write!(f, "{}:{}", self.kind(), s),
        }
    }
}

/// Candidate keys in priority order, without duplicates.
///
/// Also remembers the trimmed raw input, which legacy id fields are matched
/// against verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateKeys {
    raw: String,
    keys: Vec<CandidateKey>,
}

impl CandidateKeys {
    fn push(&mut self, key: CandidateKey) {
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CandidateKey> {
        self.keys.iter()
    }

    pub fn first(&self) -> Option<&CandidateKey> {
        self.keys.first()
    }

    pub fn canonical_id(&self) -> Option<Uuid> {
        self.keys.iter().find_map(|k| match k {
            CandidateKey::CanonicalId(id) => Some(*id),
            _ => None,
        })
    }

    pub fn slug(&self) -> Option<&str> {
        self.keys.iter().find_map(|k| match k {
            CandidateKey::Slug(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn normalized_name(&self) -> Option<&str> {
        self.keys.iter().find_map(|k| match k {
            CandidateKey::NormalizedName(s) => Some(s.as_str()),
            _ => None,
        })
    }
}

impl<'a> IntoIterator for &'a CandidateKeys {
    type Item = &'a CandidateKey;
    type IntoIter = std::slice::Iter<'a, CandidateKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

/// Interpret a raw identifier every way it could have been meant.
///
/// Never fails: an empty input yields no candidates, and a value that is not
/// a valid canonical id simply omits that candidate.
pub fn normalize(raw: &str) -> CandidateKeys {
    let raw = raw.trim();
    let mut keys = CandidateKeys {
        raw: raw.to_string(),
        keys: Vec::new(),
    };
    if raw.is_empty() {
        return keys;
    }

    if let Ok(id) = Uuid::parse_str(raw) {
        keys.push(CandidateKey::CanonicalId(id));
    }
    keys.push(CandidateKey::Slug(raw.to_string()));

    let name = normalize_name(raw);
    if !name.is_empty() && name != raw {
        keys.push(CandidateKey::NormalizedName(name));
    }
    keys
}

/// Lowercase, strip diacritics, drop non-word characters and join words with
/// single hyphens: `"Café da  Maria!"` becomes `"cafe-da-maria"`. Word
/// characters are letters, digits and `_`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.nfd().filter(|c| !is_combining_mark(*c)) {
        if c.is_alphanumeric() || c == '_' {
            if pending_separator && !out.is_empty() {
                out.push('-');
            }
            pending_separator = false;
            out.extend(c.to_lowercase());
        } else if c.is_whitespace() || c == '-' {
            pending_separator = true;
        }
        // any other punctuation is dropped without splitting words
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name_strips_accents_and_punctuation() {
        assert_eq!(normalize_name("Café da  Maria!"), "cafe-da-maria");
        assert_eq!(normalize_name("LOJA-X"), "loja-x");
        assert_eq!(normalize_name("  São Paulo -- Centro "), "sao-paulo-centro");
        assert_eq!(normalize_name("Loja_Nova 2"), "loja_nova-2");
        assert_eq!(normalize_name("Açaí & Cia."), "acai-cia");
        assert_eq!(normalize_name("!!!"), "");
    }

    #[test]
    fn test_normalize_orders_candidates() {
        let id = Uuid::new_v4();
        let keys = normalize(&id.to_string());
        assert_eq!(keys.first(), Some(&CandidateKey::CanonicalId(id)));
        assert_eq!(keys.slug(), Some(id.to_string().as_str()));
    }

    #[test]
    fn test_normalize_omits_invalid_canonical_id() {
        let keys = normalize("not-a-uuid-1234");
        assert_eq!(keys.canonical_id(), None);
        assert_eq!(keys.first(), Some(&CandidateKey::Slug("not-a-uuid-1234".to_string())));
    }

    #[test]
    fn test_normalize_dedupes_equal_forms() {
        let keys = normalize("loja-x");
        assert_eq!(keys.len(), 1);

        let keys = normalize("LOJA-X");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys.normalized_name(), Some("loja-x"));
    }

    #[test]
    fn test_normalize_empty_input() {
        assert!(normalize("   ").is_empty());
        assert_eq!(normalize(" sku-9 ").raw(), "sku-9");
    }
}
