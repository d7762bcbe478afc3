//! Per-phase helper registries.

use std::sync::Arc;

use crate::helper::{Helper, HelperDescriptor, HelperKind, HelperMode};

/// A helper plus the identity it was assigned at registration.
#[derive(Debug)]
pub struct RegisteredEntry<A: Send + 'static> {
    /// `{kind}:{key}#{index}`, unique within one registry.
    pub id: String,
    pub index: usize,
    pub helper: Helper<A>,
}

impl<A: Send + 'static> RegisteredEntry<A> {
    pub fn key(&self) -> &str {
        self.helper.key()
    }

    pub fn descriptor(&self) -> &HelperDescriptor {
        self.helper.descriptor()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("Attempted to register helper \"{key}\" with kind \"{kind}\" in the {expected} registry.")]
    KindMismatch {
        key: String,
        kind: HelperKind,
        expected: HelperKind,
    },

    #[error("Helper \"{key}\" is already registered with mode \"override\" for kind \"{kind}\".")]
    OverrideConflict {
        key: String,
        kind: HelperKind,
        helper: Arc<HelperDescriptor>,
        existing: Arc<HelperDescriptor>,
    },
}

/// Ordered collection of helpers for one phase.
///
/// Several helpers may share a key; only `override` helpers are unique per key.
#[derive(Debug)]
pub struct HelperRegistry<A: Send + 'static> {
    kind: HelperKind,
    entries: Vec<RegisteredEntry<A>>,
}

impl<A: Send + 'static> HelperRegistry<A> {
    pub fn new(kind: HelperKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    pub fn kind(&self) -> &HelperKind {
        &self.kind
    }

    pub fn entries(&self) -> &[RegisteredEntry<A>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries registered under `key`, in registration order.
    pub fn by_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a RegisteredEntry<A>> + 'a {
        self.entries.iter().filter(move |e| e.key() == key)
    }

    pub fn register(&mut self, helper: Helper<A>) -> Result<&RegisteredEntry<A>, RegistrationError> {
        if helper.kind() != &self.kind {
            return Err(RegistrationError::KindMismatch {
                key: helper.key().to_string(),
                kind: helper.kind().clone(),
                expected: self.kind.clone(),
            });
        }

        if helper.mode() == HelperMode::Override {
            let existing = self
                .by_key(helper.key())
                .find(|e| e.helper.mode() == HelperMode::Override);
            if let Some(existing) = existing {
                return Err(RegistrationError::OverrideConflict {
                    key: helper.key().to_string(),
                    kind: self.kind.clone(),
                    helper: helper.shared_descriptor(),
                    existing: existing.helper.shared_descriptor(),
                });
            }
        }

        let index = self.entries.len();
        let id = format!("{}:{}#{}", self.kind, helper.key(), index);
        self.entries.push(RegisteredEntry { id, index, helper });
        Ok(&self.entries[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Next;
    use crate::helper::{HelperApply, HelperBuilder};
    use async_trait::async_trait;
    use ordo_types::Result;

    struct Noop;

    #[async_trait]
    impl HelperApply<()> for Noop {
        async fn apply(&self, _args: (), _next: &Next<'_>) -> Result<()> {
            Ok(())
        }
    }

    fn helper(key: &str, kind: HelperKind, mode: HelperMode) -> Helper<()> {
        HelperBuilder::new(key, kind).mode(mode).build(Noop)
    }

    #[test]
    fn register_assigns_stable_ids() {
        let mut reg = HelperRegistry::new(HelperKind::Builder);
        reg.register(helper("builder.php", HelperKind::Builder, HelperMode::Extend))
            .unwrap();
        let second = reg
            .register(helper("builder.js", HelperKind::Builder, HelperMode::Extend))
            .unwrap();

        assert_eq!(second.id, "builder:builder.js#1");
        assert_eq!(second.index, 1);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn duplicate_extend_keys_are_allowed() {
        let mut reg = HelperRegistry::new(HelperKind::Builder);
        reg.register(helper("builder.duplicate", HelperKind::Builder, HelperMode::Extend))
            .unwrap();
        reg.register(helper("builder.duplicate", HelperKind::Builder, HelperMode::Extend))
            .unwrap();

        assert_eq!(reg.by_key("builder.duplicate").count(), 2);
    }

    #[test]
    fn second_override_for_same_key_conflicts() {
        let mut reg = HelperRegistry::new(HelperKind::Fragment);
        reg.register(helper("ir.meta", HelperKind::Fragment, HelperMode::Override))
            .unwrap();
        let err = reg
            .register(helper("ir.meta", HelperKind::Fragment, HelperMode::Override))
            .unwrap_err();

        match &err {
            RegistrationError::OverrideConflict { key, existing, .. } => {
                assert_eq!(key, "ir.meta");
                assert_eq!(existing.mode, HelperMode::Override);
            }
            other => panic!("Expected OverrideConflict, got: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "Helper \"ir.meta\" is already registered with mode \"override\" for kind \"fragment\"."
        );
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn override_beside_extend_is_allowed() {
        let mut reg = HelperRegistry::new(HelperKind::Fragment);
        reg.register(helper("ir.meta", HelperKind::Fragment, HelperMode::Extend))
            .unwrap();
        reg.register(helper("ir.meta", HelperKind::Fragment, HelperMode::Override))
            .unwrap();
        reg.register(helper("ir.meta", HelperKind::Fragment, HelperMode::Merge))
            .unwrap();
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let mut reg = HelperRegistry::new(HelperKind::Fragment);
        let err = reg
            .register(helper("builder.php", HelperKind::Builder, HelperMode::Extend))
            .unwrap_err();

        assert!(matches!(err, RegistrationError::KindMismatch { .. }));
        assert_eq!(
            err.to_string(),
            "Attempted to register helper \"builder.php\" with kind \"builder\" in the fragment registry."
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn custom_kinds_shape_ids() {
        let kind = HelperKind::Custom("validator".into());
        let mut reg = HelperRegistry::new(kind.clone());
        let entry = reg.register(helper("schema", kind, HelperMode::Extend)).unwrap();
        assert_eq!(entry.id, "validator:schema#0");
    }
}
