pub mod limits;

use serde::{Deserialize, Serialize};

use crate::AssocId;
use crate::records::limits::{Fairshare, LimitSet};

pub const ROOT_ACCOUNT: &str = "root";

/// One per-period usage record carried on an association. The scheduler path
/// does not consume these; they ride along through cache updates and the
/// store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Start of the accounting period (seconds since the epoch).
    pub period_start: u64,
    pub alloc_cpu_secs: u64,
}

/// An accounting association: the (acct, cluster, user?, partition?) tuple
/// a job is authorized and bounded by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub id: AssocId,
    pub cluster: String,
    pub acct: String,
    /// `None` makes this an account association shared by all users of the
    /// account on this cluster.
    pub user: Option<String>,
    /// `None` means the association applies to any partition.
    pub partition: Option<String>,
    pub fairshare: Fairshare,
    pub limits: LimitSet,
    #[serde(default)]
    pub usage: Vec<UsageRecord>,
}

impl Association {
    /// The implicit root association every cluster owns.
    pub fn root_for_cluster(id: AssocId, cluster: &str) -> Association {
        Association {
            id,
            cluster: cluster.to_string(),
            acct: ROOT_ACCOUNT.to_string(),
            user: None,
            partition: None,
            fairshare: Fairshare::Inherit,
            limits: LimitSet::default(),
            usage: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.acct.eq_ignore_ascii_case(ROOT_ACCOUNT) && self.user.is_none()
    }

    /// True iff this record belongs to the given user (case-insensitive).
    pub fn belongs_to_user(&self, user: &str) -> bool {
        self.user
            .as_deref()
            .is_some_and(|u| u.eq_ignore_ascii_case(user))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminLevel {
    #[default]
    None,
    Operator,
    Admin,
}

/// An accounting user. The name is the primary key and compares
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    /// `None` when the numeric uid is not (yet) known.
    pub uid: Option<u32>,
    pub default_acct: Option<String>,
    /// Accounts this user coordinates.
    #[serde(default)]
    pub coordinator_of: Vec<String>,
    #[serde(default)]
    pub admin_level: AdminLevel,
}

impl User {
    pub fn new(name: &str) -> User {
        User {
            name: name.to_string(),
            uid: None,
            default_acct: None,
            coordinator_of: Vec::new(),
            admin_level: AdminLevel::None,
        }
    }
}

/// An accounting cluster record. The control host/port are opaque to this
/// crate; the limit fields are the cluster-wide defaults the limit resolver
/// substitutes for inherited association fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub control_host: Option<String>,
    pub control_port: Option<u16>,
    pub fairshare: Fairshare,
    pub limits: LimitSet,
}

impl Cluster {
    pub fn new(name: &str) -> Cluster {
        Cluster {
            name: name.to_string(),
            control_host: None,
            control_port: None,
            fairshare: Fairshare::Inherit,
            limits: LimitSet::default(),
        }
    }
}
