//! Dense and sparse search, both scoped to one snapshot.

use sqlx::Row;
use uuid::Uuid;

use crate::error::Result;
use crate::store::Store;
use crate::vector::Vector;

/// Optional narrowing applied to both search modalities.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Restrict hits to paths under this prefix.
    pub path_prefix: Option<String>,
    /// Restrict hits to one language.
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub node_id: Uuid,
    pub file_path: String,
    /// Cosine similarity, higher is better.
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FtsHit {
    pub node_id: Uuid,
    pub file_path: String,
    /// bm25 rank, lower is better.
    pub rank: f64,
}

/// Turn free text into an FTS5 MATCH expression: quoted tokens OR-ed
/// together, so user punctuation never hits the query parser.
pub fn fts_match_expr(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" OR ")
}

impl Store {
    /// Cosine ranking over the snapshot's vectors.
    pub async fn search_vectors(
        &self,
        query: &Vector,
        limit: usize,
        snapshot_id: Uuid,
        filters: &SearchFilters,
    ) -> Result<Vec<VectorHit>> {
        let mut sql = String::from(
            "SELECT e.node_id AS node_id, e.vector AS vector, n.file_path AS file_path
             FROM embeddings e
             JOIN chunk_nodes n ON n.id = e.node_id
             WHERE e.snapshot_id = ?",
        );
        if filters.path_prefix.is_some() {
            sql.push_str(" AND n.file_path LIKE ? ESCAPE '\\'");
        }
        if filters.language.is_some() {
            sql.push_str(
                " AND n.file_id IN (SELECT id FROM files WHERE snapshot_id = ? AND language = ?)",
            );
        }

        let mut q = sqlx::query(&sql).bind(snapshot_id);
        if let Some(prefix) = &filters.path_prefix {
            q = q.bind(format!("{}%", like_escape(prefix)));
        }
        if let Some(language) = &filters.language {
            q = q.bind(snapshot_id).bind(language);
        }

        let rows = q.fetch_all(self.pool()).await?;

        let mut hits: Vec<VectorHit> = rows
            .iter()
            .map(|row| {
                let vector: Vector = row.try_get("vector")?;
                Ok(VectorHit {
                    node_id: row.try_get("node_id")?,
                    file_path: row.try_get("file_path")?,
                    score: query.cosine(&vector),
                })
            })
            .collect::<Result<_>>()?;

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Lexical bm25 ranking over `(tags, content)`.
    pub async fn search_fts(
        &self,
        query: &str,
        limit: usize,
        snapshot_id: Uuid,
        filters: &SearchFilters,
    ) -> Result<Vec<FtsHit>> {
        let match_expr = fts_match_expr(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT d.node_id AS node_id, d.file_path AS file_path, \
             bm25(search_fts) AS rank
             FROM search_fts
             JOIN search_docs d ON d.rowid = search_fts.rowid
             JOIN chunk_nodes n ON n.id = d.node_id
             WHERE search_fts MATCH ? AND n.snapshot_id = ?",
        );
        if filters.path_prefix.is_some() {
            sql.push_str(" AND n.file_path LIKE ? ESCAPE '\\'");
        }
        if filters.language.is_some() {
            sql.push_str(
                " AND n.file_id IN (SELECT id FROM files WHERE snapshot_id = ? AND language = ?)",
            );
        }
        sql.push_str(" ORDER BY rank LIMIT ?");

        let mut q = sqlx::query(&sql).bind(&match_expr).bind(snapshot_id);
        if let Some(prefix) = &filters.path_prefix {
            q = q.bind(format!("{}%", like_escape(prefix)));
        }
        if let Some(language) = &filters.language {
            q = q.bind(snapshot_id).bind(language);
        }
        q = q.bind(limit as i64);

        let rows = q.fetch_all(self.pool()).await?;
        rows.iter()
            .map(|row| {
                Ok(FtsHit {
                    node_id: row.try_get("node_id")?,
                    file_path: row.try_get("file_path")?,
                    rank: row.try_get("rank")?,
                })
            })
            .collect()
    }
}

fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_match_expr_quotes_tokens() {
        assert_eq!(fts_match_expr("process payment"), "\"process\" OR \"payment\"");
    }

    #[test]
    fn test_fts_match_expr_strips_operators() {
        assert_eq!(
            fts_match_expr("foo.bar(baz) AND NOT"),
            "\"foo\" OR \"bar\" OR \"baz\" OR \"AND\" OR \"NOT\""
        );
    }

    #[test]
    fn test_fts_match_expr_empty_input() {
        assert_eq!(fts_match_expr("!!! ..."), "");
    }
}
