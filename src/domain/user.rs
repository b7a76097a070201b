use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "user_id")]
    pub id: Uuid,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub registered_on: OffsetDateTime,
    /// Votes cast + net votes on owned live videos + banked score.
    pub score: i64,
}

/// Permission group. Membership decides which capabilities a user holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserGroup {
    Member,
    /// Entered once a user's warning count crosses the restriction threshold.
    /// There is no way back.
    Restricted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Post,
    Vote,
}

impl UserGroup {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "member" => Some(Self::Member),
            "restricted" => Some(Self::Restricted),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Restricted => "restricted",
        }
    }

    pub fn allows(&self, capability: Capability) -> bool {
        match (self, capability) {
            (Self::Member, Capability::Post) => true,
            (Self::Member, Capability::Vote) => true,
            (Self::Restricted, Capability::Post) => false,
            (Self::Restricted, Capability::Vote) => false,
        }
    }
}

/// Response body of the auth status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct UserStatus {
    pub user_id: Uuid,
    /// Banned videos the user has not been told about yet.
    pub warning_ids: Vec<Uuid>,
    pub vote_restricted: bool,
    pub post_restricted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_can_post_and_vote() {
        assert!(UserGroup::Member.allows(Capability::Post));
        assert!(UserGroup::Member.allows(Capability::Vote));
    }

    #[test]
    fn restricted_users_lose_both_capabilities() {
        assert!(!UserGroup::Restricted.allows(Capability::Post));
        assert!(!UserGroup::Restricted.allows(Capability::Vote));
    }

    #[test]
    fn group_db_round_trip() {
        for group in [UserGroup::Member, UserGroup::Restricted] {
            assert_eq!(UserGroup::from_db(group.as_db()), Some(group));
        }
        assert_eq!(UserGroup::from_db("admin"), None);
    }
}
