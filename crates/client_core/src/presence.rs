use std::collections::HashSet;

use shared::{
    domain::{CustomerId, UserId},
    protocol::OnlineSnapshot,
};

/// Online sets for the two disjoint counterpart populations.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    users: HashSet<UserId>,
    customers: HashSet<CustomerId>,
}

impl PresenceTracker {
    pub fn set_user_online(&mut self, user_id: UserId, online: bool) -> bool {
        if online {
            self.users.insert(user_id)
        } else {
            self.users.remove(&user_id)
        }
    }

    pub fn set_customer_online(&mut self, customer_id: CustomerId, online: bool) -> bool {
        if online {
            self.customers.insert(customer_id)
        } else {
            self.customers.remove(&customer_id)
        }
    }

    /// Authoritative snapshot. The customer set is only replaced when the
    /// snapshot carries one.
    pub fn replace(&mut self, snapshot: &OnlineSnapshot) {
        self.users = snapshot.user_ids.iter().copied().collect();
        if let Some(customer_ids) = &snapshot.customer_ids {
            self.customers = customer_ids.iter().copied().collect();
        }
    }

    pub fn is_user_online(&self, user_id: UserId) -> bool {
        self.users.contains(&user_id)
    }

    pub fn is_customer_online(&self, customer_id: CustomerId) -> bool {
        self.customers.contains(&customer_id)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<_> = self.users.iter().copied().collect();
        users.sort();
        users
    }

    pub fn online_customers(&self) -> Vec<CustomerId> {
        let mut customers: Vec<_> = self.customers.iter().copied().collect();
        customers.sort();
        customers
    }

    pub fn clear(&mut self) {
        self.users.clear();
        self.customers.clear();
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
