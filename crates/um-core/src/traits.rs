//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use std::collections::HashMap;

use async_trait::async_trait;
#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::error::Result;
use crate::models::{
    FollowOutcome, FollowStatus, NewReply, NewRepost, NewThread, NewUser, Page, PageRequest,
    ReplyDetail, ReplyId, ReplyNode, ReplyView, RepostId, RepostView, Thread, ThreadId, ThreadView,
    User, UserCredentials, UserId, UserProfile, VoteAggregate, VoteOutcome, VoteTarget, VoteValue,
};

/// Persistence contract for registered users.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Fails with `Conflict` when the email is already registered.
    async fn create_user(&self, user: NewUser) -> Result<User>;
    async fn get_user(&self, id: UserId) -> Result<User>;
    async fn find_credentials(&self, email: &str) -> Result<Option<UserCredentials>>;
}

/// Persistence contract for threads.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ThreadRepo: Send + Sync {
    async fn create_thread(&self, thread: NewThread) -> Result<Thread>;
    async fn get_thread(&self, id: ThreadId) -> Result<ThreadView>;
    /// Newest first.
    async fn list_threads(&self, page: PageRequest) -> Result<Page<ThreadView>>;
}

/// One current vote per (user, target); aggregates computed from the ledger.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait VoteLedger: Send + Sync {
    /// Inserts or overwrites the caller's vote in one atomic write, then
    /// returns the target's recomputed aggregate.
    ///
    /// Fails with `NotFound` when the target does not exist.
    async fn set_vote(&self, user_id: UserId, target: VoteTarget, value: VoteValue) -> Result<VoteOutcome>;

    async fn aggregate(&self, target: VoteTarget) -> Result<VoteAggregate>;

    /// Batched `aggregate`. Every requested target is present in the result,
    /// zeroed when it has no votes. Existence of targets is not checked.
    async fn aggregates(&self, targets: &[VoteTarget]) -> Result<HashMap<VoteTarget, VoteAggregate>>;

    async fn upvote(&self, user_id: UserId, target: VoteTarget) -> Result<VoteOutcome> {
        self.set_vote(user_id, target, VoteValue::Up).await
    }

    async fn downvote(&self, user_id: UserId, target: VoteTarget) -> Result<VoteOutcome> {
        self.set_vote(user_id, target, VoteValue::Down).await
    }
}

/// Reply forest per thread, served one level at a time.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ReplyStore: Send + Sync {
    async fn create_reply(&self, reply: NewReply) -> Result<ReplyNode>;

    /// Lists exactly the replies of `thread_id` whose parent equals `parent_id`
    /// (`None` selects top-level replies), newest first.
    async fn list_replies(
        &self,
        thread_id: ThreadId,
        parent_id: Option<ReplyId>,
        page: PageRequest,
    ) -> Result<Page<ReplyView>>;

    async fn get_reply(&self, id: ReplyId) -> Result<ReplyDetail>;
}

/// Thread reposts, at most one per (user, thread).
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait RepostRepo: Send + Sync {
    /// Fails with `NotFound` for a missing thread and `Conflict` for a repeat.
    async fn create_repost(&self, repost: NewRepost) -> Result<RepostView>;

    /// Newest first, each with the reposted thread.
    async fn reposts_by_user(&self, user_id: UserId, page: PageRequest) -> Result<Page<RepostView>>;

    /// Newest first, without the thread.
    async fn reposts_by_thread(&self, thread_id: ThreadId, page: PageRequest) -> Result<Page<RepostView>>;

    /// Only the reposting user may delete; anyone else gets `Forbidden`.
    async fn delete_repost(&self, id: RepostId, requester: UserId) -> Result<()>;
}

/// Directed follow edges between users.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait FollowRepo: Send + Sync {
    /// Fails with `NotFound` for an unknown target, `ValidationError` for a
    /// self-follow and `Conflict` for an existing edge.
    async fn follow(&self, follower: UserId, following: UserId) -> Result<FollowOutcome>;

    /// Returns the unfollowed user's remaining follower count.
    async fn unfollow(&self, follower: UserId, following: UserId) -> Result<i64>;

    async fn followers(&self, user_id: UserId, page: PageRequest) -> Result<Page<UserProfile>>;
    async fn following(&self, user_id: UserId, page: PageRequest) -> Result<Page<UserProfile>>;
    async fn follow_status(&self, viewer: UserId, target: UserId) -> Result<FollowStatus>;
}

/// Identity contract: password hashing and bearer tokens.
#[cfg_attr(any(test, feature = "testing"), automock)]
pub trait AuthProvider: Send + Sync {
    fn hash_password(&self, password: &str) -> Result<String>;

    /// Verifies if a provided password matches a stored hash.
    fn verify_password(&self, password: &str, hash: &str) -> bool;

    fn issue_token(&self, user_id: UserId) -> Result<String>;

    /// Fails with `Unauthorized` for malformed, forged or expired tokens.
    fn verify_token(&self, token: &str) -> Result<UserId>;
}
