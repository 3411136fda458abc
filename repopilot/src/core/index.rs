//! In-memory lexical retrieval over repository documents.
//!
//! Scoring is BM25 over identifier-derived terms. Loading documents from disk
//! lives in [`crate::io::documents`]; this module never touches the filesystem.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;

const K1: f64 = 1.2;
const B: f64 = 0.75;
const MIN_TERM_LEN: usize = 2;

/// One repository file held in the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Path relative to the checkout root, `/`-separated.
    pub path: String,
    pub content: String,
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit<'a> {
    pub document: &'a Document,
    pub score: f64,
}

#[derive(Debug, Clone)]
struct Posting {
    term_counts: HashMap<String, u32>,
    length: u32,
}

/// BM25 index built once per session from the loaded documents.
#[derive(Debug, Clone)]
pub struct RetrievalIndex {
    documents: Vec<Document>,
    postings: Vec<Posting>,
    document_frequency: HashMap<String, u32>,
    average_length: f64,
}

impl RetrievalIndex {
    pub fn build(documents: Vec<Document>) -> Self {
        let mut document_frequency: HashMap<String, u32> = HashMap::new();
        let mut postings = Vec::with_capacity(documents.len());
        let mut total_length = 0u64;

        for document in &documents {
            // The path carries useful terms (module and file names).
            let mut terms = tokenize(&document.path);
            terms.extend(tokenize(&document.content));
            let mut term_counts: HashMap<String, u32> = HashMap::new();
            for term in terms {
                *term_counts.entry(term).or_default() += 1;
            }
            for term in term_counts.keys() {
                *document_frequency.entry(term.clone()).or_default() += 1;
            }
            let length: u32 = term_counts.values().sum();
            total_length += u64::from(length);
            postings.push(Posting {
                term_counts,
                length,
            });
        }

        let average_length = if documents.is_empty() {
            0.0
        } else {
            total_length as f64 / documents.len() as f64
        };

        Self {
            documents,
            postings,
            document_frequency,
            average_length,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Look up a document by its relative path.
    pub fn get(&self, path: &str) -> Option<&Document> {
        self.documents.iter().find(|doc| doc.path == path)
    }

    /// Return up to `limit` documents with a positive score, best first.
    ///
    /// Ties break by path so results are stable across runs.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit<'_>> {
        let mut query_terms: BTreeMap<String, u32> = BTreeMap::new();
        for term in tokenize(query) {
            *query_terms.entry(term).or_default() += 1;
        }
        if query_terms.is_empty() || limit == 0 {
            return Vec::new();
        }

        let total = self.documents.len() as f64;
        let mut hits: Vec<SearchHit<'_>> = self
            .postings
            .iter()
            .zip(&self.documents)
            .filter_map(|(posting, document)| {
                let score: f64 = query_terms
                    .keys()
                    .map(|term| self.term_score(posting, term, total))
                    .sum();
                (score > 0.0).then_some(SearchHit { document, score })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.document.path.cmp(&b.document.path))
        });
        hits.truncate(limit);
        hits
    }

    fn term_score(&self, posting: &Posting, term: &str, total: f64) -> f64 {
        let Some(&tf) = posting.term_counts.get(term) else {
            return 0.0;
        };
        let df = f64::from(self.document_frequency.get(term).copied().unwrap_or(0));
        let idf = ((total - df + 0.5) / (df + 0.5) + 1.0).ln();
        let tf = f64::from(tf);
        let norm = if self.average_length > 0.0 {
            1.0 - B + B * f64::from(posting.length) / self.average_length
        } else {
            1.0
        };
        idf * (tf * (K1 + 1.0)) / (tf + K1 * norm)
    }
}

/// Split text into lowercase identifier terms.
///
/// `snake_case` and `camelCase` identifiers also contribute their parts.
pub fn tokenize(text: &str) -> Vec<String> {
    static IDENT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9_]*").expect("valid identifier regex"));

    let mut terms = Vec::new();
    for ident in IDENT_RE.find_iter(text) {
        let ident = ident.as_str();
        let whole = ident.trim_matches('_').to_ascii_lowercase();
        let parts = split_identifier(ident);
        if parts.len() > 1 && whole.len() >= MIN_TERM_LEN {
            terms.push(whole);
        }
        terms.extend(parts.into_iter().filter(|part| part.len() >= MIN_TERM_LEN));
    }
    terms
}

fn split_identifier(ident: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for chunk in ident.split('_').filter(|chunk| !chunk.is_empty()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for ch in chunk.chars() {
            if ch.is_ascii_uppercase() && prev_lower && !current.is_empty() {
                parts.push(current.to_ascii_lowercase());
                current.clear();
            }
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            current.push(ch);
        }
        if !current.is_empty() {
            parts.push(current.to_ascii_lowercase());
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str, content: &str) -> Document {
        Document {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn tokenize_splits_snake_and_camel_case() {
        let terms = tokenize("load_user parseHTTPRequest x");
        assert!(terms.contains(&"load_user".to_string()));
        assert!(terms.contains(&"load".to_string()));
        assert!(terms.contains(&"user".to_string()));
        assert!(terms.contains(&"parsehttprequest".to_string()));
        assert!(terms.contains(&"parse".to_string()));
        assert!(!terms.contains(&"x".to_string()));
    }

    #[test]
    fn search_ranks_matching_documents_first() {
        let index = RetrievalIndex::build(vec![
            doc("app.py", "def main():\n    print('hello')\n"),
            doc("db/session.py", "class Session:\n    def connect(self): pass\n"),
            doc("README.md", "Database session handling lives in db/session.py"),
        ]);

        let hits = index.search("database session connect", 10);
        let paths: Vec<&str> = hits.iter().map(|hit| hit.document.path.as_str()).collect();
        assert_eq!(paths.first(), Some(&"db/session.py"));
        assert!(!paths.contains(&"app.py"), "zero-score documents are dropped");
    }

    #[test]
    fn search_respects_limit_and_breaks_ties_by_path() {
        let index = RetrievalIndex::build(vec![
            doc("b.py", "token"),
            doc("a.py", "token"),
            doc("c.py", "token"),
        ]);

        let hits = index.search("token", 2);
        let paths: Vec<&str> = hits.iter().map(|hit| hit.document.path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "b.py"]);
    }

    #[test]
    fn empty_index_and_empty_query_return_nothing() {
        let empty = RetrievalIndex::build(Vec::new());
        assert!(empty.is_empty());
        assert!(empty.search("anything", 5).is_empty());

        let index = RetrievalIndex::build(vec![doc("a.py", "value")]);
        assert!(index.search("!!", 5).is_empty());
        assert_eq!(index.get("a.py").map(|d| d.content.as_str()), Some("value"));
    }
}
