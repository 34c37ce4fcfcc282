//! Post detail loading: a post plus its whole comment tree in a fixed
//! number of queries.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use super::models::{CommentWithAuthor, PostWithAuthor};
use super::queries::{get_comments_for_post, get_post_with_author};

/// A comment and its replies.
#[derive(Debug, Clone, Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: CommentWithAuthor,
    pub replies: Vec<CommentNode>,
}

/// A post with its top-level comments, each carrying its reply subtree.
#[derive(Debug, Clone, Serialize)]
pub struct PostDetail {
    pub post: PostWithAuthor,
    pub comments: Vec<CommentNode>,
}

impl PostDetail {
    /// Total number of comments in the tree.
    #[must_use]
    pub fn comment_count(&self) -> usize {
        fn count(nodes: &[CommentNode]) -> usize {
            nodes.iter().map(|n| 1 + count(&n.replies)).sum()
        }
        count(&self.comments)
    }
}

/// Loads post details and counts the queries it issues.
///
/// One query for the post (author and like count joined), one for all of its
/// comments (authors and like counts joined). The tree is assembled in
/// memory, so the query count does not grow with the number of comments.
pub struct PostTreeQuery<'a> {
    pool: &'a SqlitePool,
    queries_issued: usize,
}

impl<'a> PostTreeQuery<'a> {
    #[must_use]
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self {
            pool,
            queries_issued: 0,
        }
    }

    /// Load a post and its comment tree. `None` if the post does not exist.
    pub async fn fetch(&mut self, post_id: i64) -> Result<Option<PostDetail>> {
        self.queries_issued += 1;
        let Some(post) = get_post_with_author(self.pool, post_id).await? else {
            return Ok(None);
        };

        self.queries_issued += 1;
        let rows = get_comments_for_post(self.pool, post_id).await?;
        let loaded = rows.len();

        let detail = PostDetail {
            post,
            comments: build_comment_tree(rows),
        };
        debug!(
            post_id,
            comments = loaded,
            queries = self.queries_issued,
            "Loaded post detail"
        );
        Ok(Some(detail))
    }

    /// Round trips issued so far by this loader.
    #[must_use]
    pub const fn queries_issued(&self) -> usize {
        self.queries_issued
    }
}

/// Arrange a flat list of comments into a forest.
///
/// Input order is kept among siblings, so rows sorted by creation time give
/// oldest-first replies. A comment whose parent is not in `rows` is placed at
/// the top level rather than dropped. Assembly is iterative, so deep reply
/// chains do not grow the call stack.
#[must_use]
pub fn build_comment_tree(rows: Vec<CommentWithAuthor>) -> Vec<CommentNode> {
    struct Frame {
        comment: CommentWithAuthor,
        pending: std::vec::IntoIter<CommentWithAuthor>,
        replies: Vec<CommentNode>,
    }

    let ids: HashSet<i64> = rows.iter().map(|c| c.id).collect();
    let mut children: HashMap<Option<i64>, Vec<CommentWithAuthor>> = HashMap::new();
    for row in rows {
        let parent = row.parent_id.filter(|p| ids.contains(p));
        children.entry(parent).or_default().push(row);
    }

    let roots = children.remove(&None).unwrap_or_default();
    let mut forest = Vec::with_capacity(roots.len());

    for root in roots {
        let kids = children.remove(&Some(root.id)).unwrap_or_default();
        let mut stack = vec![Frame {
            comment: root,
            pending: kids.into_iter(),
            replies: Vec::new(),
        }];

        while let Some(frame) = stack.last_mut() {
            if let Some(child) = frame.pending.next() {
                let kids = children.remove(&Some(child.id)).unwrap_or_default();
                stack.push(Frame {
                    comment: child,
                    pending: kids.into_iter(),
                    replies: Vec::new(),
                });
                continue;
            }

            let Some(done) = stack.pop() else { break };
            let node = CommentNode {
                comment: done.comment,
                replies: done.replies,
            };
            match stack.last_mut() {
                Some(parent) => parent.replies.push(node),
                None => forest.push(node),
            }
        }
    }

    forest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: i64, parent_id: Option<i64>) -> CommentWithAuthor {
        CommentWithAuthor {
            id,
            post_id: 1,
            parent_id,
            author_id: 1,
            author_username: "alice".to_string(),
            content: format!("comment {id}"),
            like_count: 0,
            created_at: format!("2024-01-01T00:00:{id:02}.000000Z"),
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(build_comment_tree(Vec::new()).is_empty());
    }

    #[test]
    fn test_nested_replies() {
        let rows = vec![
            comment(1, None),
            comment(2, Some(1)),
            comment(3, Some(2)),
            comment(4, None),
            comment(5, Some(1)),
        ];

        let tree = build_comment_tree(rows);

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].comment.id, 1);
        assert_eq!(tree[1].comment.id, 4);

        let replies: Vec<i64> = tree[0].replies.iter().map(|n| n.comment.id).collect();
        assert_eq!(replies, vec![2, 5]);
        assert_eq!(tree[0].replies[0].replies[0].comment.id, 3);
        assert!(tree[1].replies.is_empty());
    }

    #[test]
    fn test_orphan_goes_to_top_level() {
        let rows = vec![comment(1, None), comment(7, Some(99))];

        let tree = build_comment_tree(rows);

        let ids: Vec<i64> = tree.iter().map(|n| n.comment.id).collect();
        assert_eq!(ids, vec![1, 7]);
    }

    #[test]
    fn test_long_reply_chain() {
        let depth = 1_000;
        let rows: Vec<CommentWithAuthor> = (1..=depth)
            .map(|id| comment(id, if id == 1 { None } else { Some(id - 1) }))
            .collect();

        let tree = build_comment_tree(rows);

        assert_eq!(tree.len(), 1);
        let mut node = &tree[0];
        let mut seen = 1;
        while let Some(next) = node.replies.first() {
            node = next;
            seen += 1;
        }
        assert_eq!(seen, depth);
    }
}
