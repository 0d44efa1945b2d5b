//! # Domain Models
//!
//! These structs represent the core entities of United Minds.
//! Identifiers are database-assigned integers wrapped in distinct newtypes so
//! a thread id can never be passed where a reply id is expected.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// How many direct children `list_replies` inlines under each listed reply.
///
/// UI policy only: the preview is never authoritative for counting.
pub const CHILDREN_PREVIEW_LIMIT: i64 = 5;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// Primary key of a registered user.
    UserId
);
id_type!(
    /// Primary key of a thread.
    ThreadId
);
id_type!(
    /// Primary key of a reply.
    ReplyId
);
id_type!(
    /// Primary key of a repost.
    RepostId
);

// ── Users ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The public face of a user embedded in threads and replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSummary {
    pub id: UserId,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// A user row as needed by login: never serialized.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

// ── Threads ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: ThreadId,
    pub title: String,
    pub content: String,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewThread {
    pub author_id: UserId,
    pub title: String,
    pub content: String,
}

impl NewThread {
    pub fn validate(&self) -> Result<()> {
        require_text("title", &self.title)?;
        require_text("content", &self.content)
    }
}

/// A thread decorated with its author and current vote aggregate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadView {
    #[serde(flatten)]
    pub thread: Thread,
    pub author: AuthorSummary,
    #[serde(flatten)]
    pub votes: VoteAggregate,
}

/// Thread reference embedded in a reply detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: ThreadId,
    pub title: String,
}

// ── Replies ─────────────────────────────────────────────────────────────────

/// A reply row. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: ReplyId,
    pub thread_id: ThreadId,
    /// `None` for a top-level reply.
    pub parent_id: Option<ReplyId>,
    pub author_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReply {
    pub thread_id: ThreadId,
    pub author_id: UserId,
    pub content: String,
    pub parent_id: Option<ReplyId>,
}

impl NewReply {
    pub fn validate(&self) -> Result<()> {
        require_text("content", &self.content)
    }
}

/// A reply together with its author.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyNode {
    #[serde(flatten)]
    pub reply: Reply,
    pub author: AuthorSummary,
}

/// One entry of a `list_replies` page.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyView {
    #[serde(flatten)]
    pub node: ReplyNode,
    #[serde(flatten)]
    pub votes: VoteAggregate,
    /// At most [`CHILDREN_PREVIEW_LIMIT`] direct children, oldest first.
    pub children: Vec<ReplyNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub id: ReplyId,
}

/// A single reply with its full list of direct children.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyDetail {
    #[serde(flatten)]
    pub node: ReplyNode,
    pub thread: ThreadSummary,
    pub parent: Option<ParentRef>,
    pub children: Vec<ReplyNode>,
    pub children_count: i64,
    #[serde(flatten)]
    pub votes: VoteAggregate,
}

// ── Votes ───────────────────────────────────────────────────────────────────

/// A cast vote. Zero is not a vote, so it is not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum VoteValue {
    Up,
    Down,
}

impl From<VoteValue> for i64 {
    fn from(value: VoteValue) -> Self {
        match value {
            VoteValue::Up => 1,
            VoteValue::Down => -1,
        }
    }
}

impl TryFrom<i64> for VoteValue {
    type Error = AppError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            1 => Ok(Self::Up),
            -1 => Ok(Self::Down),
            other => Err(AppError::invalid_vote_value(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Thread,
    Reply,
}

/// The entity a vote applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum VoteTarget {
    Thread(ThreadId),
    Reply(ReplyId),
}

impl VoteTarget {
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Thread(_) => TargetKind::Thread,
            Self::Reply(_) => TargetKind::Reply,
        }
    }

    /// Storage key within the target kind's own id space.
    pub fn raw_id(&self) -> i64 {
        match self {
            Self::Thread(id) => id.0,
            Self::Reply(id) => id.0,
        }
    }

    /// Inverse of `kind()` + `raw_id()`.
    pub fn from_parts(kind: TargetKind, raw_id: i64) -> Self {
        match kind {
            TargetKind::Thread => Self::Thread(ThreadId(raw_id)),
            TargetKind::Reply => Self::Reply(ReplyId(raw_id)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub user_id: UserId,
    pub target: VoteTarget,
    pub value: VoteValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derived `{upvotes, downvotes, score}` triple. Always recomputed, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteAggregate {
    pub upvotes: i64,
    pub downvotes: i64,
    pub score: i64,
}

impl VoteAggregate {
    pub fn from_counts(upvotes: i64, downvotes: i64) -> Self {
        Self {
            upvotes,
            downvotes,
            score: upvotes - downvotes,
        }
    }
}

/// Result of `set_vote`: the stored row and the target's new aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct VoteOutcome {
    pub vote: Vote,
    #[serde(flatten)]
    pub aggregate: VoteAggregate,
}

// ── Reposts ─────────────────────────────────────────────────────────────────

/// A user sharing a thread, optionally with a comment. One per (user, thread).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Repost {
    pub id: RepostId,
    pub user_id: UserId,
    pub thread_id: ThreadId,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRepost {
    pub user_id: UserId,
    pub thread_id: ThreadId,
    pub comment: Option<String>,
}

impl NewRepost {
    /// A blank comment is stored as no comment.
    pub fn normalized(mut self) -> Self {
        self.comment = self.comment.filter(|c| !c.trim().is_empty());
        self
    }
}

/// A repost with the reposting user and, where listed per user, the thread.
#[derive(Debug, Clone, Serialize)]
pub struct RepostView {
    #[serde(flatten)]
    pub repost: Repost,
    pub user: AuthorSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadView>,
}

// ── Follows ─────────────────────────────────────────────────────────────────

/// A user as shown in follower and following lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Follow {
    pub follower_id: UserId,
    pub following: AuthorSummary,
    pub created_at: DateTime<Utc>,
}

/// Result of `follow`: the new edge and the followed user's follower count.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowOutcome {
    pub follow: Follow,
    pub follower_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowStatus {
    pub is_following: bool,
    pub follower_count: i64,
    pub following_count: i64,
}

// ── Pagination ──────────────────────────────────────────────────────────────

/// Validated offset pagination parameters (1-based page).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: i64,
    limit: i64,
}

impl PageRequest {
    pub fn new(page: i64, limit: i64) -> Result<Self> {
        if page < 1 {
            return Err(AppError::ValidationError(format!("page must be >= 1, got {page}")));
        }
        if limit < 1 {
            return Err(AppError::ValidationError(format!("limit must be >= 1, got {limit}")));
        }
        Ok(Self { page, limit })
    }

    /// Caps the page size without failing the request.
    pub fn capped(self, max_limit: i64) -> Self {
        Self {
            limit: self.limit.min(max_limit.max(1)),
            ..self
        }
    }

    pub fn page(&self) -> i64 {
        self.page
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub page: i64,
    pub limit: i64,
    /// Count of all matching rows, independent of `page` and `limit`.
    pub total: i64,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(request: PageRequest, total: i64, items: Vec<T>) -> Self {
        Self {
            page: request.page,
            limit: request.limit,
            total,
            items,
        }
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::ValidationError(format!("{field} is required")));
    }
    Ok(())
}
