//! Group membership kept in ledger state.
//!
//! Groups are created lazily on first registration, only ever grow, and are never deleted. The
//! first registration to a new group also appends its name to the listing under
//! [`GROUPS_NAME_LIST_KEY`].

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ContractError;
use crate::ledger::TxContext;

/// Ledger key holding the listing of every group name.
pub const GROUPS_NAME_LIST_KEY: &str = "AllGroups";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "users", default)]
    pub members: Vec<String>,
}

impl Group {
    pub fn contains(&self, user: &str) -> bool { self.members.iter().any(|m| m == user) }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupNames {
    #[serde(rename = "groupsName", default)]
    pub names: Vec<String>,
}

/// Stateless accessor for groups; all state lives in the ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupRegistry;

impl GroupRegistry {
    pub fn new() -> Self { Self }

    pub fn group(&self, ctx: &dyn TxContext, name: &str) -> Result<Option<Group>, ContractError> {
        let Some(raw) = ctx.get_state(name)? else { return Ok(None) };
        let mut group: Group = serde_json::from_slice(&raw).map_err(ContractError::decode("group"))?;
        group.name = name.to_string();
        Ok(Some(group))
    }

    /// Append `user` to `name`, creating the group (and listing it) on first use.
    pub fn register(&self, ctx: &dyn TxContext, name: &str, user: &str) -> Result<Group, ContractError> {
        let mut group = match self.group(ctx, name)? {
            Some(g) => g,
            None => {
                self.list_group(ctx, name)?;
                info!(group=%name, "group_created");
                Group { name: name.to_string(), members: Vec::new() }
            }
        };
        if group.contains(user) {
            return Err(ContractError::AlreadyRegistered { group: name.to_string(), user: user.to_string() });
        }
        group.members.push(user.to_string());
        let data = serde_json::to_vec(&group).map_err(ContractError::encode("group"))?;
        ctx.put_state(name, &data)?;
        debug!(group=%name, %user, members=group.members.len(), "user_registered");
        Ok(group)
    }

    pub fn group_names(&self, ctx: &dyn TxContext) -> Result<GroupNames, ContractError> {
        match ctx.get_state(GROUPS_NAME_LIST_KEY)? {
            Some(raw) => serde_json::from_slice(&raw).map_err(ContractError::decode("group name list")),
            None => Ok(GroupNames::default()),
        }
    }

    fn list_group(&self, ctx: &dyn TxContext, name: &str) -> Result<(), ContractError> {
        let mut listing = self.group_names(ctx)?;
        listing.names.push(name.to_string());
        let data = serde_json::to_vec(&listing).map_err(ContractError::encode("group name list"))?;
        ctx.put_state(GROUPS_NAME_LIST_KEY, &data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Ledger, MemoryLedger};

    #[test]
    fn register_creates_lists_and_appends() {
        let ledger = MemoryLedger::new();
        let reg = GroupRegistry::new();
        for user in ["u1", "u2"] {
            ledger.submit(&|ctx| { reg.register(ctx, "G", user)?; Ok(vec![]) }).unwrap();
        }
        ledger.submit(&|ctx| { reg.register(ctx, "H", "u1")?; Ok(vec![]) }).unwrap();

        assert_eq!(ledger.get("G").unwrap(), br#"{"users":["u1","u2"]}"#.to_vec());
        assert_eq!(ledger.get(GROUPS_NAME_LIST_KEY).unwrap(), br#"{"groupsName":["G","H"]}"#.to_vec());
        // listing written once per group, not once per member
        assert_eq!(ledger.version(GROUPS_NAME_LIST_KEY), 2);
    }

    #[test]
    fn duplicate_registration_fails_without_writing() {
        let ledger = MemoryLedger::new();
        let reg = GroupRegistry::new();
        ledger.submit(&|ctx| { reg.register(ctx, "G", "u1")?; Ok(vec![]) }).unwrap();
        let err = ledger.submit(&|ctx| { reg.register(ctx, "G", "u1")?; Ok(vec![]) }).unwrap_err();
        assert!(matches!(err, ContractError::AlreadyRegistered { .. }));
        assert_eq!(ledger.version("G"), 1);
    }

    #[test]
    fn empty_listing_on_fresh_ledger() {
        let ledger = MemoryLedger::new();
        let names = ledger.evaluate(&|ctx| {
            let n = GroupRegistry::new().group_names(ctx)?;
            Ok(n.names.join(",").into_bytes())
        }).unwrap();
        assert!(names.is_empty());
    }
}
