use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ReviewableId);
id_newtype!(TopicId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewableStatus {
    Pending,
    Approved,
    Rejected,
    Deleted,
}

impl ReviewableStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Deleted => "deleted",
        }
    }

    pub fn is_pending(self) -> bool {
        self == Self::Pending
    }
}

impl FromStr for ReviewableStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown reviewable status '{other}'")),
        }
    }
}

/// The type of record under review. Each kind carries its own action set and
/// edit validation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewableKind {
    QueuedPost,
    FlaggedPost,
    User,
}

impl ReviewableKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QueuedPost => "queued_post",
            Self::FlaggedPost => "flagged_post",
            Self::User => "user",
        }
    }
}

impl FromStr for ReviewableKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "queued_post" => Ok(Self::QueuedPost),
            "flagged_post" => Ok(Self::FlaggedPost),
            "user" => Ok(Self::User),
            other => Err(format!("unknown reviewable kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: UserId,
    pub username: String,
    pub moderator: bool,
}
