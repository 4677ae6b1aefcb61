//! Directory state: the caller's contacts and the all-users list.
//!
//! Both lists are replaced wholesale by each successful fetch and left
//! untouched by a failed one, so the view keeps showing stale-but-valid
//! data across transient outages.

use std::collections::BTreeSet;

use duochat_proto::identity::{Identity, SessionToken};

use crate::api::{DirectoryApi, NetworkError};

/// An immutable-per-fetch set of selectable identities, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSet(BTreeSet<Identity>);

impl PeerSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `id` is in the set.
    #[must_use]
    pub fn contains(&self, id: &Identity) -> bool {
        self.0.contains(id)
    }

    /// Identities in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.0.iter()
    }

    /// A copy of this set with `id` removed.
    #[must_use]
    pub fn without(&self, id: &Identity) -> Self {
        self.0.iter().filter(|p| *p != id).cloned().collect()
    }
}

impl FromIterator<Identity> for PeerSet {
    fn from_iter<I: IntoIterator<Item = Identity>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PeerSet {
    type Item = &'a Identity;
    type IntoIter = std::collections::btree_set::Iter<'a, Identity>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Which list a refresh touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryList {
    /// `GET /friends`.
    Contacts,
    /// `GET /users`.
    AllUsers,
}

/// Outcome of [`Directory::refresh`]: one entry per list that failed.
pub type RefreshFailures = Vec<(DirectoryList, NetworkError)>;

/// The two peer lists for one logged-in identity.
#[derive(Debug, Clone)]
pub struct Directory {
    self_id: Identity,
    contacts: PeerSet,
    all_users: PeerSet,
}

impl Directory {
    /// An empty directory for `self_id`.
    #[must_use]
    pub fn new(self_id: Identity) -> Self {
        Self {
            self_id,
            contacts: PeerSet::new(),
            all_users: PeerSet::new(),
        }
    }

    /// Existing contacts as of the last successful fetch.
    #[must_use]
    pub const fn contacts(&self) -> &PeerSet {
        &self.contacts
    }

    /// Every other known identity as of the last successful fetch. Never
    /// contains the caller.
    #[must_use]
    pub const fn all_users(&self) -> &PeerSet {
        &self.all_users
    }

    /// Fetches both lists, replacing each one whose fetch succeeds.
    ///
    /// Failures are logged and returned; the corresponding list keeps its
    /// previous contents.
    pub async fn refresh<D: DirectoryApi>(&mut self, api: &D, token: &SessionToken) -> RefreshFailures {
        let mut failures = Vec::new();

        match api.fetch_contacts(token).await {
            Ok(contacts) => self.contacts = contacts,
            Err(e) => {
                tracing::warn!(err = %e, "contact fetch failed, keeping previous list");
                failures.push((DirectoryList::Contacts, e));
            }
        }

        match api.fetch_all_users(token).await {
            Ok(users) => self.all_users = users.without(&self.self_id),
            Err(e) => {
                tracing::warn!(err = %e, "user list fetch failed, keeping previous list");
                failures.push((DirectoryList::AllUsers, e));
            }
        }

        tracing::debug!(
            contacts = self.contacts.len(),
            all_users = self.all_users.len(),
            "directory refreshed"
        );
        failures
    }

    /// Empties both lists.
    pub fn clear(&mut self) {
        self.contacts = PeerSet::new();
        self.all_users = PeerSet::new();
    }
}
