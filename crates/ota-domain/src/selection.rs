//! Selection policies decide which catalogued update to launch and whether a
//! freshly loaded update should replace the one already running.

use crate::model::Update;

pub trait SelectionPolicy: Send + Sync {
    /// Choose the update to launch from the launchable set, or `None` when no
    /// update is usable by the running binary.
    fn launchable_update<'a>(&self, updates: &'a [Update]) -> Option<&'a Update>;

    /// Whether `candidate` should replace `launched`.
    fn should_load_new_update(&self, candidate: Option<&Update>, launched: Option<&Update>)
        -> bool;
}

/// Launches the newest update built for the running binary.
///
/// Among updates with identical commit times the first one in input order
/// wins, so catalog ordering keeps the choice stable across calls. A candidate
/// only replaces the launched update when it is strictly newer; ties keep what
/// is running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewestCompatible {
    binary_token: String,
}

impl NewestCompatible {
    #[must_use]
    pub fn new(binary_token: impl Into<String>) -> Self {
        Self {
            binary_token: binary_token.into(),
        }
    }

    #[must_use]
    pub fn binary_token(&self) -> &str {
        &self.binary_token
    }
}

impl SelectionPolicy for NewestCompatible {
    fn launchable_update<'a>(&self, updates: &'a [Update]) -> Option<&'a Update> {
        let mut selected: Option<&Update> = None;
        for update in updates
            .iter()
            .filter(|update| update.is_compatible_with(&self.binary_token))
        {
            match selected {
                Some(current) if current.commit_time >= update.commit_time => {}
                _ => selected = Some(update),
            }
        }
        selected
    }

    fn should_load_new_update(
        &self,
        candidate: Option<&Update>,
        launched: Option<&Update>,
    ) -> bool {
        let Some(candidate) = candidate else {
            return false;
        };
        if !candidate.is_compatible_with(&self.binary_token) {
            return false;
        }
        match launched {
            None => true,
            Some(launched) => candidate.commit_time > launched.commit_time,
        }
    }
}

/// Pins the launch to one update id while it remains launchable and accepted
/// by the fallback, falling back to that policy otherwise. Adoption of new
/// updates is suppressed while the pinned update is running; everything else
/// defers to the fallback, so an older or incompatible candidate is never
/// adopted.
pub struct PinnedUpdate<P> {
    update_id: String,
    fallback: P,
}

impl<P: SelectionPolicy> PinnedUpdate<P> {
    #[must_use]
    pub fn new(update_id: impl Into<String>, fallback: P) -> Self {
        Self {
            update_id: update_id.into(),
            fallback,
        }
    }
}

impl<P: SelectionPolicy> SelectionPolicy for PinnedUpdate<P> {
    fn launchable_update<'a>(&self, updates: &'a [Update]) -> Option<&'a Update> {
        updates
            .iter()
            .find(|update| update.id == self.update_id)
            .filter(|pinned| {
                self.fallback
                    .launchable_update(std::slice::from_ref(*pinned))
                    .is_some()
            })
            .or_else(|| self.fallback.launchable_update(updates))
    }

    fn should_load_new_update(
        &self,
        candidate: Option<&Update>,
        launched: Option<&Update>,
    ) -> bool {
        if launched.is_some_and(|launched| launched.id == self.update_id) {
            return false;
        }
        self.fallback.should_load_new_update(candidate, launched)
    }
}
