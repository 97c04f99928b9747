// Per-message reaction aggregation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Reaction kind -> users who chose it. A user holds at most one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reactions {
    by_kind: BTreeMap<String, BTreeSet<String>>,
}

impl Reactions {
    /// Build from a server reaction map. If the server lists a user under more
    /// than one kind, the lexicographically first kind wins so the result is
    /// deterministic and still one-kind-per-user.
    pub fn from_map<I, U>(map: I) -> Self
    where
        I: IntoIterator<Item = (String, U)>,
        U: IntoIterator<Item = String>,
    {
        let sorted: BTreeMap<String, Vec<String>> = map
            .into_iter()
            .map(|(kind, users)| (kind, users.into_iter().collect()))
            .collect();
        let mut out = Self::default();
        for (kind, users) in sorted {
            for user in users {
                if out.kind_of(&user).is_none() {
                    out.by_kind.entry(kind.clone()).or_default().insert(user);
                }
            }
        }
        out
    }

    pub fn kind_of(&self, user_id: &str) -> Option<&str> {
        self.by_kind
            .iter()
            .find(|(_, users)| users.contains(user_id))
            .map(|(kind, _)| kind.as_str())
    }

    /// Record `user_id` reacting with `kind`, replacing any previous kind.
    /// Returns whether anything changed.
    pub fn add(&mut self, user_id: &str, kind: &str) -> bool {
        if self.kind_of(user_id) == Some(kind) {
            return false;
        }
        self.remove(user_id);
        self.by_kind
            .entry(kind.to_string())
            .or_default()
            .insert(user_id.to_string());
        true
    }

    /// Remove whatever `user_id` reacted with. Returns the removed kind.
    pub fn remove(&mut self, user_id: &str) -> Option<String> {
        let kind = self.kind_of(user_id)?.to_string();
        if let Some(users) = self.by_kind.get_mut(&kind) {
            users.remove(user_id);
            if users.is_empty() {
                self.by_kind.remove(&kind);
            }
        }
        Some(kind)
    }

    /// Force `user_id` to exactly `kind` (or no reaction).
    pub fn set(&mut self, user_id: &str, kind: Option<&str>) -> bool {
        match kind {
            Some(kind) => self.add(user_id, kind),
            None => self.remove(user_id).is_some(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.by_kind.iter().map(|(k, users)| (k.as_str(), users))
    }

    pub fn count(&self, kind: &str) -> usize {
        self.by_kind.get(kind).map(BTreeSet::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingReaction {
    /// What the user had before the first unconfirmed local change.
    previous: Option<String>,
    desired: Option<String>,
}

/// Local reaction changes that the live stream has not confirmed yet, keyed
/// by (message id, user id).
#[derive(Debug, Clone, Default)]
pub struct PendingReactions {
    entries: HashMap<(String, String), PendingReaction>,
}

impl PendingReactions {
    /// Remember a local change. Repeated changes keep the original rollback point.
    pub fn record(
        &mut self,
        message_id: &str,
        user_id: &str,
        previous: Option<String>,
        desired: Option<String>,
    ) {
        self.entries
            .entry((message_id.to_string(), user_id.to_string()))
            .and_modify(|p| p.desired = desired.clone())
            .or_insert(PendingReaction { previous, desired });
    }

    /// A live event for this user+message arrived; the server state is now
    /// authoritative. Returns whether a local change was pending.
    pub fn confirm(&mut self, message_id: &str, user_id: &str) -> bool {
        self.entries
            .remove(&(message_id.to_string(), user_id.to_string()))
            .is_some()
    }

    /// The publish failed: returns the kind to restore, if anything was pending.
    pub fn rollback(&mut self, message_id: &str, user_id: &str) -> Option<Option<String>> {
        self.entries
            .remove(&(message_id.to_string(), user_id.to_string()))
            .map(|p| p.previous)
    }

    /// Re-apply still-pending local changes on top of a server reaction map.
    pub fn overlay(&self, message_id: &str, reactions: &mut Reactions) {
        for ((mid, user), pending) in &self.entries {
            if mid == message_id {
                reactions.set(user, pending.desired.as_deref());
            }
        }
    }

    pub fn forget_message(&mut self, message_id: &str) {
        self.entries.retain(|(mid, _), _| mid != message_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_pending(&self, message_id: &str, user_id: &str) -> bool {
        self.entries
            .contains_key(&(message_id.to_string(), user_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_kind_from_same_user_replaces_first() {
        let mut r = Reactions::default();
        assert!(r.add("u1", "paw"));
        assert!(r.add("u1", "heart"));
        assert_eq!(r.kind_of("u1"), Some("heart"));
        assert_eq!(r.count("paw"), 0);
        assert_eq!(r.count("heart"), 1);
        assert_eq!(r.iter().count(), 1);
    }

    #[test]
    fn add_is_idempotent() {
        let mut r = Reactions::default();
        assert!(r.add("u1", "paw"));
        let before = r.clone();
        assert!(!r.add("u1", "paw"));
        assert_eq!(r, before);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut r = Reactions::default();
        r.add("u1", "paw");
        assert_eq!(r.remove("u2"), None);
        assert_eq!(r.count("paw"), 1);
        assert_eq!(r.remove("u1").as_deref(), Some("paw"));
        assert!(r.is_empty());
    }

    #[test]
    fn server_map_keeps_one_kind_per_user() {
        let r = Reactions::from_map(vec![
            ("paw".to_string(), vec!["u1".to_string(), "u2".to_string()]),
            ("heart".to_string(), vec!["u1".to_string()]),
        ]);
        assert_eq!(r.kind_of("u1"), Some("heart"));
        assert_eq!(r.kind_of("u2"), Some("paw"));
        assert_eq!(r.count("paw"), 1);
    }

    #[test]
    fn pending_rollback_restores_first_previous() {
        let mut p = PendingReactions::default();
        p.record("m1", "me", None, Some("paw".into()));
        p.record("m1", "me", Some("paw".into()), Some("heart".into()));
        assert_eq!(p.rollback("m1", "me"), Some(None));
        assert_eq!(p.rollback("m1", "me"), None);
    }

    #[test]
    fn overlay_reapplies_pending_on_server_state() {
        let mut p = PendingReactions::default();
        p.record("m1", "me", None, Some("paw".into()));
        p.record("m2", "me", Some("paw".into()), None);

        let mut server = Reactions::from_map(vec![("heart".to_string(), vec!["bob".to_string()])]);
        p.overlay("m1", &mut server);
        assert_eq!(server.kind_of("me"), Some("paw"));
        assert_eq!(server.kind_of("bob"), Some("heart"));

        let mut other = Reactions::from_map(vec![("paw".to_string(), vec!["me".to_string()])]);
        p.overlay("m2", &mut other);
        assert_eq!(other.kind_of("me"), None);
    }
}
