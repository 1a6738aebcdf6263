use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Highest group index read from the environment.
const MAX_GROUPS: u8 = 10;

/// Index of a user group. Each group has its own ledger endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingGroup(pub u8);

impl std::fmt::Display for RoutingGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group {}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct GroupRoute {
    pub group: RoutingGroup,
    pub members: HashSet<u64>,
    pub ledger_url: String,
    /// Extra text appended to receipt announcements for this group.
    /// `{folder_url}` is replaced with the submitter's archive folder.
    pub footer: Option<String>,
    /// Parent folder for per-user upload archives.
    pub archive_folder: Option<String>,
}

/// Maps users to their routing group.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: Vec<GroupRoute>,
}

impl RoutingTable {
    pub fn new(routes: Vec<GroupRoute>) -> Self {
        let mut routes = routes;
        routes.sort_by_key(|r| r.group);
        Self { routes }
    }

    /// Reads `ALLOWED_USERS_<n>`, `LEDGER_URL_<n>`, `GROUP_FOOTER_<n>` and
    /// `MAIN_FOLDER_ID_<n>`.
    /// A group with members but no ledger URL is a configuration error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut routes = Vec::new();

        for n in 0..MAX_GROUPS {
            let Some(raw_members) = lookup(&format!("ALLOWED_USERS_{}", n)) else {
                continue;
            };
            let members = raw_members
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u64>()
                        .with_context(|| format!("ALLOWED_USERS_{}: invalid user id '{}'", n, s))
                })
                .collect::<Result<HashSet<u64>>>()?;
            if members.is_empty() {
                continue;
            }

            let ledger_url = match lookup(&format!("LEDGER_URL_{}", n)) {
                Some(url) if !url.trim().is_empty() => url.trim().to_string(),
                _ => bail!("group {} has members but LEDGER_URL_{} is not set", n, n),
            };
            let footer = lookup(&format!("GROUP_FOOTER_{}", n))
                .map(|f| f.replace("\\n", "\n"))
                .filter(|f| !f.trim().is_empty());
            let archive_folder = lookup(&format!("MAIN_FOLDER_ID_{}", n))
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty());

            info!(
                group = n,
                members = members.len(),
                archive = archive_folder.is_some(),
                "Routing group configured"
            );
            routes.push(GroupRoute {
                group: RoutingGroup(n),
                members,
                ledger_url,
                footer,
                archive_folder,
            });
        }

        Ok(Self::new(routes))
    }

    /// Lowest-numbered group containing the user.
    pub fn group_for(&self, user_id: u64) -> Option<RoutingGroup> {
        self.routes
            .iter()
            .find(|r| r.members.contains(&user_id))
            .map(|r| r.group)
    }

    pub fn ledger_url(&self, group: RoutingGroup) -> Option<&str> {
        self.route(group).map(|r| r.ledger_url.as_str())
    }

    pub fn footer(&self, group: RoutingGroup) -> Option<&str> {
        self.route(group).and_then(|r| r.footer.as_deref())
    }

    pub fn archive_folder(&self, group: RoutingGroup) -> Option<&str> {
        self.route(group).and_then(|r| r.archive_folder.as_deref())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn route(&self, group: RoutingGroup) -> Option<&GroupRoute> {
        self.routes.iter().find(|r| r.group == group)
    }
}
