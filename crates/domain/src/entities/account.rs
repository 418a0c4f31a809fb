use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 账号在组内的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    Control,
    Experiment,
    Member,
}

impl std::fmt::Display for AccountRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountRole::Control => write!(f, "control"),
            AccountRole::Experiment => write!(f, "experiment"),
            AccountRole::Member => write!(f, "member"),
        }
    }
}

impl std::str::FromStr for AccountRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control" => Ok(AccountRole::Control),
            "experiment" => Ok(AccountRole::Experiment),
            "member" => Ok(AccountRole::Member),
            other => Err(format!("未知的账号角色: {other}")),
        }
    }
}

/// 账号组成员
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub account_id: String,
    pub role: AccountRole,
    pub active: bool,
}

/// 账号组
///
/// 成员有序，生命周期独立于调度，调度核心只读。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountGroup {
    pub id: i64,
    pub name: String,
    pub members: Vec<GroupMember>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountGroup {
    pub fn active_members(&self) -> Vec<GroupMember> {
        self.members.iter().filter(|m| m.active).cloned().collect()
    }
}
