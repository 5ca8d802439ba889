//! Per-generator record of what happened to each package this session.

use crate::generator::ShouldGenerate;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationState {
    /// Queued or running.
    Generating,
    Generated,
    Failed,
}

/// Proof that a caller claimed a package with [`GenerationStates::try_begin`].
/// Only the holder of the latest claim may record the outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Claim(u64);

#[derive(Debug, Default)]
struct Entries {
    states: HashMap<String, (GenerationState, u64)>,
    next_claim: u64,
}

/// Package atom → [`GenerationState`]. A missing entry means the package
/// was never attempted.
///
/// Every generator owns one store; nothing is shared across generators.
#[derive(Debug, Default)]
pub struct GenerationStates {
    entries: Mutex<Entries>,
}

impl GenerationStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, package: &str) -> Option<GenerationState> {
        self.entries.lock().states.get(package).map(|(state, _)| *state)
    }

    /// Mark `package` as [`GenerationState::Generating`] unless a build for
    /// it is already queued or running.
    pub fn try_begin(&self, package: &str) -> Option<Claim> {
        let mut entries = self.entries.lock();
        if let Some((GenerationState::Generating, _)) = entries.states.get(package) {
            tracing::trace!(package, "Already generating");
            return None;
        }
        entries.next_claim += 1;
        let claim = entries.next_claim;
        entries.states.insert(package.to_string(), (GenerationState::Generating, claim));
        tracing::trace!(package, claim, "Generation state changed to Generating");
        Some(Claim(claim))
    }

    /// Record how the build claimed by `claim` ended. Ignored when the
    /// package was reset, invalidated or claimed again in the meantime;
    /// returns whether the outcome was kept.
    pub fn finish(&self, package: &str, claim: Claim, state: GenerationState) -> bool {
        let mut entries = self.entries.lock();
        match entries.states.get_mut(package) {
            Some((current, owner)) if *owner == claim.0 => {
                tracing::trace!(package, ?state, "Generation state changed");
                *current = state;
                true
            },
            _ => {
                tracing::debug!(package, ?state, "Discarding outcome of a superseded build");
                false
            },
        }
    }

    /// Forget `package`; returns whether there was anything to forget.
    pub fn remove(&self, package: &str) -> bool {
        self.entries.lock().states.remove(package).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().states.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().states.is_empty()
    }
}

/// Whether a package in `state` needs a build. A previously generated
/// package whose database has since vanished from disk is built again.
pub fn decide(state: Option<GenerationState>, destination_exists: bool) -> ShouldGenerate {
    match state {
        None => ShouldGenerate::Yes,
        Some(GenerationState::Generated) if !destination_exists => ShouldGenerate::Yes,
        Some(GenerationState::Generated) => ShouldGenerate::NoNeedNoChange,
        Some(GenerationState::Generating) => ShouldGenerate::NoGenerating,
        Some(GenerationState::Failed) => ShouldGenerate::NoHasFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, false, ShouldGenerate::Yes)]
    #[case(None, true, ShouldGenerate::Yes)]
    #[case(Some(GenerationState::Generated), true, ShouldGenerate::NoNeedNoChange)]
    #[case(Some(GenerationState::Generated), false, ShouldGenerate::Yes)]
    #[case(Some(GenerationState::Generating), true, ShouldGenerate::NoGenerating)]
    #[case(Some(GenerationState::Generating), false, ShouldGenerate::NoGenerating)]
    #[case(Some(GenerationState::Failed), true, ShouldGenerate::NoHasFailed)]
    #[case(Some(GenerationState::Failed), false, ShouldGenerate::NoHasFailed)]
    fn test_decide(
        #[case] state: Option<GenerationState>,
        #[case] destination_exists: bool,
        #[case] expected: ShouldGenerate,
    ) {
        assert_eq!(decide(state, destination_exists), expected);
    }

    #[test]
    fn test_store() {
        let states = GenerationStates::new();
        assert!(states.is_empty());
        let codelab = states.try_begin("chromeos-base/codelab").unwrap();
        assert!(states.finish("chromeos-base/codelab", codelab, GenerationState::Generated));
        let shill = states.try_begin("chromeos-base/shill").unwrap();
        assert!(states.finish("chromeos-base/shill", shill, GenerationState::Failed));
        assert_eq!(states.get("chromeos-base/codelab"), Some(GenerationState::Generated));
        assert_eq!(states.len(), 2);

        assert!(states.remove("chromeos-base/shill"));
        assert!(!states.remove("chromeos-base/shill"));
        states.clear();
        assert_eq!(states.get("chromeos-base/codelab"), None);
    }

    #[test]
    fn test_claim_is_exclusive_while_generating() {
        let states = GenerationStates::new();
        let claim = states.try_begin("chromeos-base/codelab").unwrap();
        assert_eq!(states.try_begin("chromeos-base/codelab"), None);
        assert!(states.try_begin("chromeos-base/shill").is_some());

        // A settled package, failed or not, can be claimed again.
        assert!(states.finish("chromeos-base/codelab", claim, GenerationState::Failed));
        assert!(states.try_begin("chromeos-base/codelab").is_some());
    }

    #[rstest]
    #[case::cleared(true)]
    #[case::removed(false)]
    fn test_superseded_outcome_is_discarded(#[case] clear: bool) {
        let states = GenerationStates::new();
        let stale = states.try_begin("chromeos-base/codelab").unwrap();
        match clear {
            true => states.clear(),
            false => assert!(states.remove("chromeos-base/codelab")),
        }
        assert!(!states.finish("chromeos-base/codelab", stale, GenerationState::Generated));
        assert_eq!(states.get("chromeos-base/codelab"), None);

        let fresh = states.try_begin("chromeos-base/codelab").unwrap();
        assert!(!states.finish("chromeos-base/codelab", stale, GenerationState::Generated));
        assert_eq!(states.get("chromeos-base/codelab"), Some(GenerationState::Generating));
        assert!(states.finish("chromeos-base/codelab", fresh, GenerationState::Generated));
        assert_eq!(states.get("chromeos-base/codelab"), Some(GenerationState::Generated));
    }
}
