//! Product catalog store, partitioned by category.
//!
//! Read-mostly from the chat pipeline's perspective: retrieval runs a
//! brute-force cosine scan over stored embeddings, optionally fused
//! with a full-text ranking via reciprocal-rank fusion.

use std::collections::HashMap;
use std::path::Path;

use sqlx::{Row, SqlitePool};

use super::{deserialize_embedding, open_pool, serialize_embedding};
use crate::core::errors::ChatError;
use crate::models::Product;
use crate::vector_math::rank_descending_by_cosine;

/// Standard reciprocal-rank-fusion dampening constant.
const RRF_K: f32 = 60.0;

#[derive(Debug, Clone)]
pub struct ProductSearchResult {
    pub product: Product,
    pub score: f32,
}

#[derive(Clone)]
pub struct ProductStore {
    pool: SqlitePool,
}

impl ProductStore {
    pub async fn new(db_path: &Path) -> Result<Self, ChatError> {
        let pool = open_pool(db_path).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ChatError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS products (
                id TEXT NOT NULL,
                category_id TEXT NOT NULL,
                category_name TEXT NOT NULL DEFAULT '',
                sku TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                price REAL NOT NULL DEFAULT 0,
                tags TEXT NOT NULL DEFAULT '[]',
                reviews TEXT NOT NULL DEFAULT '[]',
                vectors BLOB,
                PRIMARY KEY (id, category_id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ChatError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_category ON products(category_id)")
            .execute(&self.pool)
            .await
            .map_err(ChatError::internal)?;

        Ok(())
    }

    pub async fn upsert_product(&self, product: &Product) -> Result<(), ChatError> {
        let tags = serde_json::to_string(&product.tags).map_err(ChatError::internal)?;
        let reviews = serde_json::to_string(&product.reviews).map_err(ChatError::internal)?;
        let vectors = product.vectors.as_deref().map(serialize_embedding);

        sqlx::query(
            "INSERT OR REPLACE INTO products
                (id, category_id, category_name, sku, name, description, price,
                 tags, reviews, vectors)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&product.id)
        .bind(&product.category_id)
        .bind(&product.category_name)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(tags)
        .bind(reviews)
        .bind(vectors)
        .execute(&self.pool)
        .await
        .map_err(ChatError::internal)?;

        Ok(())
    }

    pub async fn get_product(
        &self,
        id: &str,
        category_id: &str,
    ) -> Result<Option<Product>, ChatError> {
        let row = sqlx::query("SELECT * FROM products WHERE id = ?1 AND category_id = ?2")
            .bind(id)
            .bind(category_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ChatError::internal)?;

        row.as_ref().map(row_to_product).transpose()
    }

    pub async fn delete_product(&self, id: &str, category_id: &str) -> Result<bool, ChatError> {
        let result = sqlx::query("DELETE FROM products WHERE id = ?1 AND category_id = ?2")
            .bind(id)
            .bind(category_id)
            .execute(&self.pool)
            .await
            .map_err(ChatError::internal)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> Result<usize, ChatError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await
            .map_err(ChatError::internal)?;

        Ok(count as usize)
    }

    /// Top-K products by cosine similarity to the query vector,
    /// descending. Products without an embedding are skipped.
    pub async fn vector_search(
        &self,
        vectors: &[f32],
        limit: usize,
    ) -> Result<Vec<ProductSearchResult>, ChatError> {
        let rows = sqlx::query("SELECT * FROM products WHERE vectors IS NOT NULL")
            .fetch_all(&self.pool)
            .await
            .map_err(ChatError::internal)?;

        let mut embeddings = Vec::with_capacity(rows.len());
        let mut products = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("vectors");
            embeddings.push(deserialize_embedding(&blob));
            products.push(row_to_product(row)?);
        }

        Ok(rank_descending_by_cosine(vectors, &embeddings)
            .into_iter()
            .take(limit.max(1))
            .map(|(idx, score)| ProductSearchResult {
                product: products[idx].clone(),
                score,
            })
            .collect())
    }

    /// Substring match over product name and description. `%` and `_`
    /// in the pattern match themselves, not as LIKE wildcards.
    pub async fn text_search(&self, pattern: &str, limit: usize) -> Result<Vec<Product>, ChatError> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let escaped = format!("%{}%", escape_like(trimmed));

        let rows = sqlx::query(
            "SELECT * FROM products
             WHERE name LIKE ?1 ESCAPE '\\' OR description LIKE ?1 ESCAPE '\\'
             LIMIT ?2",
        )
        .bind(&escaped)
        .bind(limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ChatError::internal)?;

        rows.iter().map(row_to_product).collect()
    }

    /// Hybrid search: vector and full-text rankings fused with
    /// reciprocal-rank fusion (1 / (k + rank), k = 60).
    pub async fn hybrid_search(
        &self,
        text: &str,
        vectors: &[f32],
        limit: usize,
    ) -> Result<Vec<ProductSearchResult>, ChatError> {
        let vector_ranked = self.vector_search(vectors, limit.max(1) * 2).await?;
        let text_ranked = self.text_search(text, limit.max(1) * 2).await?;

        let mut fused: HashMap<String, (Product, f32)> = HashMap::new();

        for (rank, result) in vector_ranked.into_iter().enumerate() {
            let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
            fused
                .entry(result.product.id.clone())
                .and_modify(|(_, score)| *score += contribution)
                .or_insert((result.product, contribution));
        }
        for (rank, product) in text_ranked.into_iter().enumerate() {
            let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
            fused
                .entry(product.id.clone())
                .and_modify(|(_, score)| *score += contribution)
                .or_insert((product, contribution));
        }

        let mut combined: Vec<ProductSearchResult> = fused
            .into_values()
            .map(|(product, score)| ProductSearchResult { product, score })
            .collect();
        combined.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        combined.truncate(limit.max(1));

        Ok(combined)
    }
}

fn escape_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<Product, ChatError> {
    let tags: String = row.get("tags");
    let reviews: String = row.get("reviews");
    let vectors: Option<Vec<u8>> = row.get("vectors");

    Ok(Product {
        id: row.get("id"),
        category_id: row.get("category_id"),
        category_name: row.get("category_name"),
        sku: row.get("sku"),
        name: row.get("name"),
        description: row.get("description"),
        price: row.get("price"),
        tags: serde_json::from_str(&tags).map_err(ChatError::internal)?,
        reviews: serde_json::from_str(&reviews).map_err(ChatError::internal)?,
        vectors: vectors.as_deref().map(deserialize_embedding),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (ProductStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProductStore::new(&dir.path().join("products.db"))
            .await
            .unwrap();
        (store, dir)
    }

    fn product(id: &str, name: &str, description: &str, vectors: Vec<f32>) -> Product {
        Product {
            id: id.to_string(),
            category_id: "bikes".to_string(),
            category_name: "Bikes".to_string(),
            sku: format!("SKU-{}", id),
            name: name.to_string(),
            description: description.to_string(),
            price: 450.0,
            tags: vec![],
            reviews: vec![],
            vectors: Some(vectors),
        }
    }

    #[tokio::test]
    async fn upsert_and_get_round_trip() {
        let (store, _dir) = test_store().await;

        let item = product("p1", "Mountain-100", "Competition mountain bike", vec![1.0, 0.0]);
        store.upsert_product(&item).await.unwrap();

        let loaded = store.get_product("p1", "bikes").await.unwrap().unwrap();
        assert_eq!(loaded, item);
        assert!(store.get_product("p1", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn vector_search_ranks_by_similarity() {
        let (store, _dir) = test_store().await;

        store
            .upsert_product(&product("p1", "Mountain-100", "mountain bike", vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert_product(&product("p2", "Road-250", "road bike", vec![0.0, 1.0]))
            .await
            .unwrap();
        store
            .upsert_product(&product("p3", "Touring-300", "touring bike", vec![0.9, 0.1]))
            .await
            .unwrap();

        let results = store.vector_search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].product.id, "p1");
        assert_eq!(results[1].product.id, "p3");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn text_search_matches_name_and_description() {
        let (store, _dir) = test_store().await;

        store
            .upsert_product(&product("p1", "Mountain-100", "trail ready", vec![1.0]))
            .await
            .unwrap();
        store
            .upsert_product(&product("p2", "Road-250", "for mountain passes", vec![1.0]))
            .await
            .unwrap();

        let results = store.text_search("mountain", 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(store.text_search("   ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn text_search_treats_like_wildcards_literally() {
        let (store, _dir) = test_store().await;

        store
            .upsert_product(&product("p1", "Mountain-100", "trail ready", vec![1.0]))
            .await
            .unwrap();
        store
            .upsert_product(&product("p2", "100% Carbon Fork", "stiff and light", vec![1.0]))
            .await
            .unwrap();

        // A literal percent sign must not act as match-anything.
        let results = store.text_search("100%", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "p2");

        // No product contains a literal underscore.
        assert!(store.text_search("_", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hybrid_search_boosts_items_in_both_rankings() {
        let (store, _dir) = test_store().await;

        // p1 matches both the vector and the text ranking; p2 only the
        // vector ranking; p3 only the text ranking.
        store
            .upsert_product(&product("p1", "Mountain-100", "mountain bike", vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert_product(&product("p2", "Road-250", "road bike", vec![0.95, 0.05]))
            .await
            .unwrap();
        store
            .upsert_product(&product("p3", "Trail Map", "mountain guide", vec![0.0, 1.0]))
            .await
            .unwrap();

        let results = store.hybrid_search("mountain", &[1.0, 0.0], 3).await.unwrap();
        assert_eq!(results[0].product.id, "p1");
    }

    #[tokio::test]
    async fn delete_product_reports_whether_it_existed() {
        let (store, _dir) = test_store().await;

        store
            .upsert_product(&product("p1", "Mountain-100", "bike", vec![1.0]))
            .await
            .unwrap();
        assert!(store.delete_product("p1", "bikes").await.unwrap());
        assert!(!store.delete_product("p1", "bikes").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
