use uuid::Uuid;

use crate::cache::Cache;
use crate::config::CacheConfig;
use crate::models::comment::Comment;
use crate::services::store::ListQuery;

const LIST_PREFIX: &str = "comments:list:";
const THREAD_PREFIX: &str = "thread:";
const STATS_PREFIX: &str = "stats:";

fn opt(id: Option<Uuid>) -> String {
    id.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn list_key(query: &ListQuery, include_replies: bool) -> String {
    format!(
        "{LIST_PREFIX}s={}:c={}:p={}:cur={}:l={}:sort={}:r={}",
        query.story_id,
        opt(query.chapter_id),
        opt(query.parent_id),
        query.page,
        query.limit,
        query.sort.as_str(),
        u8::from(include_replies)
    )
}

fn list_scope(story_id: Uuid, chapter_id: Option<Uuid>) -> String {
    format!("{LIST_PREFIX}s={story_id}:c={}:", opt(chapter_id))
}

pub fn thread_key(root_id: Uuid) -> String {
    format!("{THREAD_PREFIX}{root_id}")
}

pub fn stats_key(story_id: Uuid) -> String {
    format!("{STATS_PREFIX}story:{story_id}")
}

/// Comment-aware view over [`Cache`]: TTLs per entry kind plus invalidation rules.
#[derive(Clone)]
pub struct CommentCache {
    cache: Cache,
    ttl: CacheConfig,
}

impl CommentCache {
    pub fn new(cache: Cache, ttl: CacheConfig) -> Self {
        Self { cache, ttl }
    }

    pub fn inner(&self) -> &Cache {
        &self.cache
    }

    pub async fn get_list<T: serde::de::DeserializeOwned>(
        &self,
        query: &ListQuery,
        include_replies: bool,
    ) -> Option<T> {
        self.cache.get_json(&list_key(query, include_replies)).await
    }

    pub async fn put_list<T: serde::Serialize>(
        &self,
        query: &ListQuery,
        include_replies: bool,
        value: &T,
    ) {
        self.cache
            .set_json(&list_key(query, include_replies), value, self.ttl.list_ttl_secs)
            .await;
    }

    pub async fn get_thread<T: serde::de::DeserializeOwned>(&self, root_id: Uuid) -> Option<T> {
        self.cache.get_json(&thread_key(root_id)).await
    }

    pub async fn put_thread<T: serde::Serialize>(&self, root_id: Uuid, value: &T) {
        self.cache
            .set_json(&thread_key(root_id), value, self.ttl.thread_ttl_secs)
            .await;
    }

    pub async fn get_stats<T: serde::de::DeserializeOwned>(&self, story_id: Uuid) -> Option<T> {
        self.cache.get_json(&stats_key(story_id)).await
    }

    pub async fn put_stats<T: serde::Serialize>(&self, story_id: Uuid, value: &T) {
        self.cache
            .set_json(&stats_key(story_id), value, self.ttl.stats_ttl_secs)
            .await;
    }

    /// Drops every entry a change to `comment` can make stale.
    pub async fn invalidate_for(&self, comment: &Comment) {
        let story_id = comment.target.story_id;
        let mut dropped = self.cache.del_prefix(&list_scope(story_id, None)).await;
        if let Some(chapter_id) = comment.target.chapter_id {
            dropped += self
                .cache
                .del_prefix(&list_scope(story_id, Some(chapter_id)))
                .await;
        }
        self.cache.del(&thread_key(comment.hierarchy.root_id)).await;
        dropped += self.cache.del_prefix(STATS_PREFIX).await;
        tracing::debug!(comment_id = %comment.id, dropped, "comment cache invalidated");
    }

    /// Clears every listing, thread and stats key.
    pub async fn invalidate_all(&self) {
        let mut dropped = 0;
        for prefix in [LIST_PREFIX, THREAD_PREFIX, STATS_PREFIX] {
            dropped += self.cache.del_prefix(prefix).await;
        }
        tracing::debug!(dropped, "comment cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::ListSort;

    fn query(chapter: Option<Uuid>) -> ListQuery {
        ListQuery {
            story_id: Uuid::nil(),
            chapter_id: chapter,
            parent_id: None,
            page: 2,
            limit: 20,
            sort: ListSort::Popular,
        }
    }

    #[test]
    fn list_keys_encode_every_dimension() {
        let key = list_key(&query(None), true);
        assert_eq!(
            key,
            format!("comments:list:s={}:c=-:p=-:cur=2:l=20:sort=popular:r=1", Uuid::nil())
        );
        assert!(key.starts_with(&list_scope(Uuid::nil(), None)));
    }

    #[test]
    fn chapter_lists_have_their_own_scope() {
        let chapter = Uuid::new_v4();
        let key = list_key(&query(Some(chapter)), false);
        assert!(key.starts_with(&list_scope(Uuid::nil(), Some(chapter))));
        assert!(!key.starts_with(&list_scope(Uuid::nil(), None)));
    }
}
