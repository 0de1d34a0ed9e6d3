// Account Entity - the owner of a batch of transactions
//
// Identified by email (unique). A run never creates more than one.

use serde::{Deserialize, Serialize};

use crate::config::AccountProfile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Row id in the `accounts` table
    pub id: i64,
    pub name: String,
    pub paternal_surname: String,
    pub maternal_surname: String,
    pub email: String,
}

impl Account {
    /// Build an unsaved account from the configured profile.
    pub fn from_profile(email: &str, profile: &AccountProfile) -> Self {
        Account {
            id: 0,
            name: profile.name.clone(),
            paternal_surname: profile.paternal_surname.clone(),
            maternal_surname: profile.maternal_surname.clone(),
            email: email.to_string(),
        }
    }

    /// Name shown in the summary email: "{name} {paternal_surname}"
    pub fn display_name(&self) -> String {
        format!("{} {}", self.name, self.paternal_surname)
            .trim()
            .to_string()
    }

    pub fn is_saved(&self) -> bool {
        self.id > 0
    }
}
