//! User directory lookups.
//!
//! Recipients given without a domain are names of users in the directory.

use ahash::AHashMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub fullname: String,
    /// The user's selected primary address, if they have chosen one.
    #[serde(default)]
    pub email: Option<String>,
}

impl User {
    /// The primary address, treating an empty string the same as none.
    #[must_use]
    pub fn primary_email(&self) -> Option<&str> {
        self.email.as_deref().filter(|email| !email.is_empty())
    }
}

#[async_trait]
pub trait Directory: Send + Sync {
    /// Look up a user by name.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::InvalidName`] when no such user exists, or
    /// [`DirectoryError::Unavailable`] when the directory cannot be queried.
    async fn fetch(&self, name: &str) -> Result<User, DirectoryError>;
}

/// Directory backed by the `users` list in the configuration file.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    users: AHashMap<String, User>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|user| (user.name.clone(), user))
                .collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn fetch(&self, name: &str) -> Result<User, DirectoryError> {
        self.users
            .get(name)
            .cloned()
            .ok_or_else(|| DirectoryError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_known_and_unknown() {
        let directory = MemoryDirectory::new([User {
            name: "alice".to_string(),
            fullname: "Alice Liddell".to_string(),
            email: Some("alice@example.com".to_string()),
        }]);

        let alice = directory.fetch("alice").await.unwrap();
        assert_eq!(alice.primary_email(), Some("alice@example.com"));

        assert_eq!(
            directory.fetch("bob").await,
            Err(DirectoryError::InvalidName("bob".to_string()))
        );
    }

    #[test]
    fn empty_email_is_no_email() {
        let user = User {
            name: "carol".to_string(),
            fullname: "Carol".to_string(),
            email: Some(String::new()),
        };
        assert_eq!(user.primary_email(), None);
    }
}
