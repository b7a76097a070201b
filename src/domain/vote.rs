use serde::Serialize;
use uuid::Uuid;

/// What a vote request does to the existing (voter, video) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteAction {
    Insert,
    /// Same direction as the existing vote: the vote is withdrawn.
    Remove,
    /// Opposite direction: the row flips and its timestamp is refreshed.
    Flip,
}

impl VoteAction {
    pub fn resolve(existing: Option<bool>, upvote: bool) -> Self {
        match existing {
            None => Self::Insert,
            Some(current) if current == upvote => Self::Remove,
            Some(_) => Self::Flip,
        }
    }

    /// Resulting vote state of the caller: -1, 0 or 1.
    pub fn resulting_state(self, upvote: bool) -> i32 {
        match self {
            Self::Remove => 0,
            Self::Insert | Self::Flip => vote_value(upvote),
        }
    }
}

pub fn vote_value(upvote: bool) -> i32 {
    if upvote {
        1
    } else {
        -1
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub upvotes: i64,
    pub downvotes: i64,
}

impl Tally {
    pub fn net(&self) -> i64 {
        self.upvotes - self.downvotes
    }
}

/// Result of a vote or flag on a video.
#[derive(Debug, Clone, Serialize)]
pub struct VoteOutcome {
    pub video_id: Uuid,
    pub upvotes: i64,
    pub downvotes: i64,
    pub user_vote: i32,
    /// Set when this mutation pushed the video over the ban threshold.
    pub banned: bool,
}
