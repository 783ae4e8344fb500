//! Resolved caller identity.

use serde::{Deserialize, Serialize};

use crate::id::{AccountId, EmployeeId};

/// The `(account, creator?)` pair handed over by the auth layer.
///
/// The core never parses tokens; it only trusts this value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    account_id: AccountId,
    creator_id: Option<EmployeeId>,
}

impl Actor {
    /// The account owner acting directly.
    pub fn account(account_id: AccountId) -> Self {
        Self {
            account_id,
            creator_id: None,
        }
    }

    /// An employee acting on behalf of the account.
    pub fn employee(account_id: AccountId, employee_id: EmployeeId) -> Self {
        Self {
            account_id,
            creator_id: Some(employee_id),
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn creator_id(&self) -> Option<EmployeeId> {
        self.creator_id
    }

    pub fn owns(&self, account_id: AccountId) -> bool {
        self.account_id == account_id
    }
}
