//! Query Sanitization and Synonym Expansion
//!
//! FTS5 treats a long list of characters as syntax, and its boolean keywords
//! (AND/OR/NOT) are positional. Everything user-typed goes through the
//! sanitizers here before it reaches a MATCH expression; the expander then
//! widens recall with domain synonyms for legal and medical corpora.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Maximum number of OR-joined terms an expanded MATCH expression may carry.
/// FTS5 query planning degrades sharply past this point on large corpora.
pub const MAX_OR_TERMS: usize = 20;

/// Domain synonym table. Keys and synonyms are lowercase; lookups fold case.
static SYNONYMS: &[(&str, &[&str])] = &[
    // Legal
    ("injury", &["wound", "trauma", "harm", "damage"]),
    ("contract", &["agreement", "covenant", "settlement"]),
    ("plaintiff", &["claimant", "complainant", "petitioner"]),
    ("defendant", &["respondent", "accused"]),
    ("negligence", &["malpractice", "carelessness"]),
    ("damages", &["compensation", "restitution", "award"]),
    ("testimony", &["deposition", "statement", "affidavit"]),
    ("liability", &["responsibility", "culpability"]),
    ("fraud", &["deception", "misrepresentation"]),
    ("termination", &["dismissal", "discharge"]),
    // Medical
    ("fracture", &["break", "crack"]),
    ("diagnosis", &["assessment", "finding", "impression"]),
    ("treatment", &["therapy", "intervention", "care"]),
    ("medication", &["drug", "prescription", "pharmaceutical"]),
    ("surgery", &["operation", "procedure"]),
    ("symptom", &["complaint", "presentation"]),
    ("chronic", &["persistent", "ongoing", "longstanding"]),
    ("acute", &["sudden", "severe"]),
    ("pain", &["ache", "discomfort", "soreness"]),
    ("disability", &["impairment", "incapacity"]),
];

/// Synonyms for a single term, if the table knows it. Lookup works in both
/// directions: a term listed as a synonym expands to its group head and
/// siblings, so "agreement" reaches documents that only say "contract".
fn synonyms_for(term: &str) -> Option<Vec<&'static str>> {
    for (key, syns) in SYNONYMS {
        if key.eq_ignore_ascii_case(term) {
            return Some(syns.to_vec());
        }
    }
    for (key, syns) in SYNONYMS {
        if syns.iter().any(|s| s.eq_ignore_ascii_case(term)) {
            let mut group = vec![*key];
            group.extend(syns.iter().copied().filter(|s| !s.eq_ignore_ascii_case(term)));
            return Some(group);
        }
    }
    None
}

fn is_boolean_operator(token: &str) -> bool {
    token.eq_ignore_ascii_case("AND")
        || token.eq_ignore_ascii_case("OR")
        || token.eq_ignore_ascii_case("NOT")
}

/// Sanitize one term for use inside an FTS5 MATCH expression.
///
/// Strips everything except alphanumerics and underscores. Terms that are
/// (case-insensitively) FTS5 boolean keywords come back empty, so a stray
/// "or" typed by a user can never become an operator.
pub fn sanitize_term(term: &str) -> String {
    if is_boolean_operator(term) {
        return String::new();
    }
    term.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// Sanitize a whole query while preserving intentional boolean structure.
///
/// Operator tokens between terms are kept (uppercased) as operators and
/// other tokens are sanitized individually. FTS5 rejects an expression that
/// begins with an operator, ends with one, or stacks two in a row, so those
/// are repaired: leading operators are dropped, in a run of operators the
/// last one wins (it binds to the following term), and trailing operators
/// are popped. A NOT between terms is valid and survives.
pub fn sanitize_query(query: &str) -> String {
    let mut out: Vec<String> = Vec::new();

    for token in query.split_whitespace() {
        if is_boolean_operator(token) {
            if out.is_empty() {
                continue;
            }
            let upper = token.to_uppercase();
            match out.last_mut() {
                Some(last) if is_boolean_operator(last) => *last = upper,
                _ => out.push(upper),
            }
        } else {
            let clean = sanitize_term(token);
            if !clean.is_empty() {
                out.push(clean);
            }
        }
    }

    while out.last().map(|t| is_boolean_operator(t)).unwrap_or(false) {
        out.pop();
    }

    out.join(" ")
}

/// Synonym expansion details for one query, for callers that want to show
/// or log what a search actually matched on.
#[derive(Debug, Clone, Serialize)]
pub struct QueryExpansion {
    /// The query as given
    pub original: String,
    /// Every synonym added, in table order. Deliberately uncapped; only the
    /// executable MATCH expression enforces [`MAX_OR_TERMS`].
    pub expanded: Vec<String>,
    /// Term -> synonyms actually found in the table
    pub synonyms_found: BTreeMap<String, Vec<String>>,
}

/// Introspect which synonyms a query would pick up. Unknown terms yield an
/// empty expansion, not an error.
pub fn expanded_terms(query: &str) -> QueryExpansion {
    let mut expansion = QueryExpansion {
        original: query.to_string(),
        expanded: Vec::new(),
        synonyms_found: BTreeMap::new(),
    };

    for token in query.split_whitespace() {
        let clean = sanitize_term(token);
        if clean.is_empty() {
            continue;
        }
        if let Some(syns) = synonyms_for(&clean) {
            let listed: Vec<String> = syns.iter().map(|s| s.to_string()).collect();
            for syn in &listed {
                if !expansion.expanded.contains(syn) {
                    expansion.expanded.push(syn.clone());
                }
            }
            expansion.synonyms_found.insert(clean.to_lowercase(), listed);
        }
    }

    expansion
}

/// Build an OR-joined MATCH expression from the sanitized query terms plus
/// their synonyms, capped at [`MAX_OR_TERMS`] terms. Original terms are
/// interleaved with their synonyms so a long query cannot starve its later
/// terms entirely.
pub fn expand_query(query: &str) -> String {
    let mut terms: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    'outer: for token in query.split_whitespace() {
        let clean = sanitize_term(token);
        if clean.is_empty() {
            continue;
        }

        let synonyms = synonyms_for(&clean).unwrap_or_default();
        let candidates = std::iter::once(clean.clone())
            .chain(synonyms.into_iter().map(|s| s.to_string()));

        for candidate in candidates {
            if terms.len() >= MAX_OR_TERMS {
                break 'outer;
            }
            if seen.insert(candidate.to_lowercase()) {
                terms.push(candidate);
            }
        }
    }

    terms.join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_term_strips_metacharacters() {
        assert_eq!(sanitize_term("hello-world!"), "helloworld");
        assert_eq!(sanitize_term("\"quoted\""), "quoted");
        assert_eq!(sanitize_term("a(b)c*d"), "abcd");
        assert_eq!(sanitize_term("snake_case"), "snake_case");
        assert_eq!(sanitize_term("col:value^2"), "colvalue2");
    }

    #[test]
    fn test_sanitize_term_rejects_boolean_keywords() {
        assert_eq!(sanitize_term("AND"), "");
        assert_eq!(sanitize_term("or"), "");
        assert_eq!(sanitize_term("Not"), "");
        // Not a bare keyword, so it survives
        assert_eq!(sanitize_term("nothing"), "nothing");
    }

    #[test]
    fn test_sanitize_query_drops_leading_operators() {
        assert_eq!(sanitize_query("NOT injury"), "injury");
        assert_eq!(sanitize_query("not injury"), "injury");
        assert_eq!(sanitize_query("NOT NOT injury"), "injury");
        assert_eq!(sanitize_query("AND contract"), "contract");
        assert_eq!(sanitize_query("OR OR contract"), "contract");
    }

    #[test]
    fn test_sanitize_query_collapses_doubled_operators() {
        assert_eq!(
            sanitize_query("contract AND AND signed"),
            "contract AND signed"
        );
        // In a run of operators the last one binds to the following term
        assert_eq!(sanitize_query("injury AND NOT fraud"), "injury NOT fraud");
    }

    #[test]
    fn test_sanitize_query_preserves_internal_operators() {
        assert_eq!(sanitize_query("injury NOT fraud"), "injury NOT fraud");
        assert_eq!(sanitize_query("injury and fraud"), "injury AND fraud");
        assert_eq!(sanitize_query("wound OR trauma"), "wound OR trauma");
    }

    #[test]
    fn test_sanitize_query_drops_trailing_operator() {
        assert_eq!(sanitize_query("injury AND"), "injury");
        assert_eq!(sanitize_query("NOT"), "");
    }

    #[test]
    fn test_expanded_terms_known_synonyms() {
        let expansion = expanded_terms("injury");
        assert_eq!(expansion.expanded, vec!["wound", "trauma", "harm", "damage"]);
        assert_eq!(
            expansion.synonyms_found.get("injury").map(|v| v.len()),
            Some(4)
        );
    }

    #[test]
    fn test_expanded_terms_case_insensitive() {
        let expansion = expanded_terms("INJURY");
        assert_eq!(expansion.expanded, vec!["wound", "trauma", "harm", "damage"]);
    }

    #[test]
    fn test_expanded_terms_reverse_lookup() {
        // "agreement" is listed under "contract", so it expands to the group
        let expansion = expanded_terms("agreement");
        assert_eq!(expansion.expanded, vec!["contract", "covenant", "settlement"]);
    }

    #[test]
    fn test_expand_query_reverse_lookup() {
        let expr = expand_query("agreement");
        assert_eq!(expr, "agreement OR contract OR covenant OR settlement");
    }

    #[test]
    fn test_expanded_terms_unknown_term_is_empty() {
        let expansion = expanded_terms("zeppelin");
        assert!(expansion.expanded.is_empty());
        assert!(expansion.synonyms_found.is_empty());
    }

    #[test]
    fn test_expand_query_includes_original_and_synonyms() {
        let expr = expand_query("injury");
        assert_eq!(expr, "injury OR wound OR trauma OR harm OR damage");
    }

    #[test]
    fn test_expand_query_caps_at_max_or_terms() {
        let query = "injury contract plaintiff defendant negligence damages testimony";
        let expr = expand_query(query);
        let term_count = expr.split(" OR ").count();
        assert!(term_count <= MAX_OR_TERMS);
        // The introspection path is deliberately uncapped
        let expansion = expanded_terms(query);
        assert!(expansion.expanded.len() > MAX_OR_TERMS - 7);
    }

    #[test]
    fn test_expand_query_deduplicates() {
        let expr = expand_query("injury injury wound");
        let terms: Vec<&str> = expr.split(" OR ").collect();
        let unique: HashSet<&str> = terms.iter().copied().collect();
        assert_eq!(terms.len(), unique.len());
    }

    #[test]
    fn test_expand_query_drops_operator_tokens() {
        let expr = expand_query("injury OR fraud");
        assert!(!expr.contains("OR OR"));
        assert!(expr.starts_with("injury"));
        assert!(expr.contains("deception"));
    }
}
