// src/domain/identity.rs

//! Session identity.

use std::sync::Arc;

use uuid::Uuid;

use super::topic::{SEPARATOR, validate_recipient};
use crate::{ProtonError, Result};

/// Who a session is on the bus.
///
/// Created once per session and immutable afterwards. `id` is random and
/// local; it exists only so a session can recognise its own broadcasts when
/// they come back from the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity {
    // ---
    name: Arc<str>,
    id: Uuid,
    groups: Vec<Arc<str>>,
}

impl ClientIdentity {
    // ---
    /// Build an identity with a freshly generated id.
    ///
    /// Duplicate groups are collapsed; order of first appearance is kept.
    ///
    /// # Errors
    ///
    /// [`ProtonError::InvalidIdentity`] if the name is empty, or the name or
    /// any group is empty or contains the reserved separator.
    pub fn new<I, S>(name: impl Into<String>, groups: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        // ---
        let name: String = name.into();
        check_token("client name", &name)?;

        let mut unique: Vec<Arc<str>> = Vec::new();
        for group in groups {
            let group: String = group.into();
            check_token("group", &group)?;
            if !unique.iter().any(|g| g.as_ref() == group) {
                unique.push(Arc::from(group));
            }
        }

        Ok(Self {
            name: Arc::from(name),
            id: Uuid::new_v4(),
            groups: unique,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.as_ref())
    }

    /// Every recipient token this session answers to: its own name first,
    /// then each group, skipping a group equal to the name.
    pub fn recipient_tokens(&self) -> Vec<&str> {
        // ---
        let mut tokens = Vec::with_capacity(self.groups.len() + 1);
        tokens.push(self.name());
        tokens.extend(self.groups().filter(|g| *g != self.name()));
        tokens
    }
}

fn check_token(what: &str, token: &str) -> Result<()> {
    // ---
    validate_recipient(token).map_err(|_| {
        ProtonError::InvalidIdentity(format!(
            "{what} {token:?} must be non-empty and cannot contain `{SEPARATOR}`"
        ))
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn recipient_tokens_skip_own_name_and_duplicates() {
        // ---
        let id = ClientIdentity::new("lobby", ["common", "lobby", "common", "eu"]).unwrap();
        assert_eq!(id.recipient_tokens(), vec!["lobby", "common", "eu"]);
    }

    #[test]
    fn ids_are_unique_per_identity() {
        // ---
        let a = ClientIdentity::new("a", Vec::<String>::new()).unwrap();
        let b = ClientIdentity::new("a", Vec::<String>::new()).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn rejects_bad_tokens() {
        // ---
        assert!(matches!(
            ClientIdentity::new("", ["g"]),
            Err(ProtonError::InvalidIdentity(_))
        ));
        assert!(matches!(
            ClientIdentity::new("srv.1", ["g"]),
            Err(ProtonError::InvalidIdentity(_))
        ));
        assert!(matches!(
            ClientIdentity::new("srv", ["g.1"]),
            Err(ProtonError::InvalidIdentity(_))
        ));
    }
}
