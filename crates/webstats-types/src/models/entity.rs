use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Full Unicode case-insensitive comparison
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// A player identity with its display name resolved once per pass
///
/// Name resolution goes through the host and can be expensive, so a pass
/// resolves every player once and carries this snapshot around instead.
/// `name` is `None` when the host cannot resolve the player.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CachedEntity {
    pub id: Uuid,
    pub name: Option<String>,
    pub online: bool,
}

impl CachedEntity {
    pub fn new(id: Uuid, name: Option<String>, online: bool) -> Self {
        Self { id, name, online }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Case-insensitive display name match; unresolved names never match
    pub fn is_named(&self, name: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|own| eq_ignore_case(own, name))
    }
}
