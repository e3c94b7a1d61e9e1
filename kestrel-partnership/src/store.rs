//! Partnership policy store and resolver
//!
//! Records live in an append-only arena of immutable `Arc<Partnership>`
//! snapshots, with a name → arena slot index beside it.
//!
//! Everything is guarded by a single `RwLock`, so lookups from many request
//! workers proceed in parallel while inserts are serialised.
//!
//! # Resolution
//!
//! 1. By name, when the partial record carries one.
//! 2. By exact-subset match: every identity attribute present in the partial
//!    sender map must be present and equal in the candidate's sender map, and
//!    likewise for receivers. An empty partial map never matches. The first
//!    matching record in insertion order wins.
//!
//! On a match the caller's record is overwritten from the stored snapshot.

use std::{collections::BTreeMap, sync::Arc};

use ahash::AHashMap;
use kestrel_common::{
    Message, Partnership,
    headers::SUBJECT,
    internal,
    partnership::{attrs, ids},
};
use parking_lot::RwLock;

use crate::{error::PartnershipError, subject::render_subject};

/// Every entry of `partial` is present and equal in `candidate`.
/// An empty `partial` never matches.
fn is_subset(partial: &BTreeMap<String, String>, candidate: &BTreeMap<String, String>) -> bool {
    !partial.is_empty()
        && partial
            .iter()
            .all(|(key, value)| candidate.get(key) == Some(value))
}

#[derive(Debug, Default)]
struct Inner {
    records: Vec<Arc<Partnership>>,
    by_name: AHashMap<String, usize>,
}

impl Inner {
    fn push(&mut self, partnership: Partnership) -> Result<Arc<Partnership>, PartnershipError> {
        if let Some(name) = &partnership.name
            && self.by_name.contains_key(name)
        {
            return Err(PartnershipError::DuplicateName(name.clone()));
        }

        if partnership.sender.is_empty() || partnership.receiver.is_empty() {
            return Err(PartnershipError::MissingIdentity(partnership.label()));
        }

        let slot = self.records.len();
        let record = Arc::new(partnership);

        if let Some(name) = &record.name {
            self.by_name.insert(name.clone(), slot);
        }
        self.records.push(Arc::clone(&record));

        Ok(record)
    }

    fn find(&self, partial: &Partnership) -> Option<&Arc<Partnership>> {
        if let Some(name) = &partial.name {
            return self.by_name.get(name).map(|&slot| &self.records[slot]);
        }

        self.records.iter().find(|candidate| {
            is_subset(&partial.sender, &candidate.sender)
                && is_subset(&partial.receiver, &candidate.receiver)
        })
    }
}

/// Concurrent partnership policy store.
#[derive(Debug, Default)]
pub struct PartnershipStore {
    inner: RwLock<Inner>,
    self_fill: bool,
}

impl PartnershipStore {
    /// Create an empty store.
    ///
    /// With `self_fill` set, resolving an unknown partial record inserts it as
    /// a new partnership instead of failing. Only suitable for deliberately
    /// permissive deployments.
    #[must_use]
    pub fn new(self_fill: bool) -> Self {
        Self {
            inner: RwLock::default(),
            self_fill,
        }
    }

    /// Build a store from configured partnerships.
    ///
    /// # Errors
    /// If two partnerships share a name, or one lacks identities.
    pub fn with_partnerships(
        partnerships: impl IntoIterator<Item = Partnership>,
        self_fill: bool,
    ) -> Result<Self, PartnershipError> {
        let store = Self::new(self_fill);
        for partnership in partnerships {
            store.insert(partnership)?;
        }
        Ok(store)
    }

    #[must_use]
    pub const fn is_self_filling(&self) -> bool {
        self.self_fill
    }

    /// Add a partnership.
    ///
    /// # Errors
    /// If the name is already taken, or either identity map is empty.
    pub fn insert(&self, partnership: Partnership) -> Result<Arc<Partnership>, PartnershipError> {
        self.inner.write().push(partnership)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Partnership>> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .map(|&slot| Arc::clone(&inner.records[slot]))
    }

    /// Look up without modifying anything.
    #[must_use]
    pub fn find(&self, partial: &Partnership) -> Option<Arc<Partnership>> {
        self.inner.read().find(partial).cloned()
    }

    /// Immutable view of every stored partnership, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Partnership>> {
        self.inner.read().records.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `partial` in place from the matching stored partnership.
    ///
    /// # Errors
    /// [`PartnershipError::NotFound`] when nothing matches and the store is
    /// not self-filling.
    pub fn resolve(&self, partial: &mut Partnership) -> Result<(), PartnershipError> {
        if let Some(found) = self.find(partial) {
            *partial = Partnership::clone(&found);
            return Ok(());
        }

        if !self.self_fill {
            return Err(PartnershipError::NotFound(partial.label()));
        }

        let mut filled = partial.clone();
        if !filled.sender.contains_key(ids::X509_ALIAS)
            && let Some(as2_id) = filled.sender.get(ids::AS2_ID).cloned()
        {
            filled.sender.insert(ids::X509_ALIAS.to_string(), as2_id);
        }
        if !filled.receiver.contains_key(ids::X509_ALIAS)
            && let Some(as2_id) = filled.receiver.get(ids::AS2_ID).cloned()
        {
            filled.receiver.insert(ids::X509_ALIAS.to_string(), as2_id);
        }

        let mut inner = self.inner.write();
        // Another worker may have self-filled the same pair meanwhile.
        let record = match inner.find(partial) {
            Some(existing) => Arc::clone(existing),
            None => {
                internal!(
                    level = WARN,
                    "Self-filling unknown partnership {}",
                    filled.label()
                );
                inner.push(filled)?
            }
        };
        drop(inner);

        *partial = Partnership::clone(&record);
        Ok(())
    }

    /// Resolve the partnership of a message.
    ///
    /// For outbound messages the `Subject` header is additionally rendered
    /// from the partnership's subject template, when one is configured.
    ///
    /// # Errors
    /// If resolution fails, or the subject template is invalid.
    pub fn resolve_message(
        &self,
        message: &mut Message,
        outbound: bool,
    ) -> Result<(), PartnershipError> {
        self.resolve(&mut message.partnership)?;

        if outbound && let Some(template) = message.partnership.attribute(attrs::SUBJECT) {
            let template = template.to_string();
            let subject = render_subject(&template, message)?;
            message.headers.set(SUBJECT, subject);
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn acme() -> Partnership {
        let mut partnership = Partnership::between("A", "B");
        partnership.name = Some("acme".to_string());
        partnership
            .sender
            .insert(ids::X509_ALIAS.to_string(), "a-cert".to_string());
        partnership.set_attribute(attrs::SIGN, "sha-256");
        partnership
    }

    #[test]
    fn test_is_subset() {
        let full: BTreeMap<_, _> = [("as2_id".to_string(), "A".to_string())].into();
        assert!(is_subset(&full, &full));
        assert!(!is_subset(&BTreeMap::new(), &full));
    }

    #[test]
    fn test_resolve_by_name() {
        let store = PartnershipStore::with_partnerships([acme()], false).unwrap();

        let mut partial = Partnership::named("acme");
        store.resolve(&mut partial).unwrap();
        assert_eq!(partial, acme());

        let mut missing = Partnership::named("other");
        assert_eq!(
            store.resolve(&mut missing),
            Err(PartnershipError::NotFound("other".to_string()))
        );
        assert_eq!(missing, Partnership::named("other"));
    }

    #[test]
    fn test_resolve_full_identity_match() {
        let store = PartnershipStore::with_partnerships([acme()], false).unwrap();
        let mut partial = acme();
        partial.name = None;
        partial.attributes.clear();

        store.resolve(&mut partial).unwrap();
        assert_eq!(partial.sign_algorithm(), Some("sha-256"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let store = PartnershipStore::new(false);
        store.insert(acme()).unwrap();
        assert_eq!(
            store.insert(acme()).unwrap_err(),
            PartnershipError::DuplicateName("acme".to_string())
        );
    }

    #[test]
    fn test_missing_identity_rejected() {
        let store = PartnershipStore::new(false);
        assert!(matches!(
            store.insert(Partnership::named("empty")),
            Err(PartnershipError::MissingIdentity(_))
        ));
    }

    #[test]
    fn test_self_fill_defaults_alias() {
        let store = PartnershipStore::new(true);

        let mut partial = Partnership::between("X", "Y");
        store.resolve(&mut partial).unwrap();

        assert_eq!(partial.sender_id(ids::X509_ALIAS), Some("X"));
        assert_eq!(partial.receiver_id(ids::X509_ALIAS), Some("Y"));
        assert_eq!(store.len(), 1);

        let mut again = Partnership::between("X", "Y");
        store.resolve(&mut again).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_resolve_message_renders_subject() {
        let mut stored = acme();
        stored.set_attribute(attrs::SUBJECT, "EDI from $sender.as2_id$");
        let store = PartnershipStore::with_partnerships([stored], false).unwrap();

        let mut message = Message {
            partnership: Partnership::between("A", "B"),
            ..Message::default()
        };
        store.resolve_message(&mut message, true).unwrap();
        assert_eq!(message.headers.get(SUBJECT), Some("EDI from A"));

        let mut inbound = Message {
            partnership: Partnership::between("A", "B"),
            ..Message::default()
        };
        store.resolve_message(&mut inbound, false).unwrap();
        assert_eq!(inbound.headers.get(SUBJECT), None);
    }
}
