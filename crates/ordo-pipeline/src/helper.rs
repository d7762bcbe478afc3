//! Helper descriptors, the apply trait, and the helper factory.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ordo_types::Result;

use crate::executor::Next;

// ---------------------------------------------------------------------------
// Kind and mode
// ---------------------------------------------------------------------------

/// Phase tag carried by every helper.
///
/// Registries only accept helpers whose kind matches the kind they were
/// configured with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HelperKind {
    Fragment,
    Builder,
    Custom(String),
}

impl HelperKind {
    pub fn as_str(&self) -> &str {
        match self {
            HelperKind::Fragment => "fragment",
            HelperKind::Builder => "builder",
            HelperKind::Custom(tag) => tag.as_str(),
        }
    }
}

impl fmt::Display for HelperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for HelperKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "fragment" => HelperKind::Fragment,
            "builder" => HelperKind::Builder,
            _ => HelperKind::Custom(value),
        }
    }
}

impl From<&str> for HelperKind {
    fn from(value: &str) -> Self {
        HelperKind::from(value.to_string())
    }
}

impl From<HelperKind> for String {
    fn from(kind: HelperKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelperMode {
    #[default]
    Extend,
    /// At most one override helper may exist per (key, kind).
    Override,
    Merge,
}

impl fmt::Display for HelperMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HelperMode::Extend => "extend",
            HelperMode::Override => "override",
            HelperMode::Merge => "merge",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperDescriptor {
    pub key: String,
    pub kind: HelperKind,
    pub mode: HelperMode,
    /// Higher runs earlier among helpers that are ready at the same time.
    pub priority: i32,
    pub depends_on: Vec<String>,
    pub origin: Option<String>,
}

impl HelperDescriptor {
    pub fn new(key: impl Into<String>, kind: impl Into<HelperKind>) -> Self {
        Self {
            key: key.into(),
            kind: kind.into(),
            mode: HelperMode::default(),
            priority: 0,
            depends_on: Vec::new(),
            origin: None,
        }
    }

    /// The origin label, falling back to the key.
    pub fn label(&self) -> &str {
        self.origin.as_deref().unwrap_or(&self.key)
    }
}

// ---------------------------------------------------------------------------
// HelperApply trait
// ---------------------------------------------------------------------------

/// The work a helper performs.
///
/// `next` runs the remainder of the phase. Calling it is optional: when a
/// helper returns without calling it, the executor advances on its own.
/// Calling it more than once is a no-op after the first call.
#[async_trait]
pub trait HelperApply<A: Send + 'static>: Send + Sync {
    async fn apply(&self, args: A, next: &Next<'_>) -> Result<()>;
}

/// Adapter for async closures that never touch the continuation.
pub struct HelperFn<F>(F);

#[async_trait]
impl<A, F, Fut> HelperApply<A> for HelperFn<F>
where
    A: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn apply(&self, args: A, _next: &Next<'_>) -> Result<()> {
        (self.0)(args).await
    }
}

/// Wrap an async closure as a helper body.
pub fn helper_fn<A, F, Fut>(f: F) -> HelperFn<F>
where
    A: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    HelperFn(f)
}

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

/// An immutable descriptor paired with its apply body.
pub struct Helper<A: Send + 'static> {
    descriptor: Arc<HelperDescriptor>,
    apply: Arc<dyn HelperApply<A>>,
}

impl<A: Send + 'static> Helper<A> {
    pub fn descriptor(&self) -> &HelperDescriptor {
        &self.descriptor
    }

    pub fn shared_descriptor(&self) -> Arc<HelperDescriptor> {
        Arc::clone(&self.descriptor)
    }

    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    pub fn kind(&self) -> &HelperKind {
        &self.descriptor.kind
    }

    pub fn mode(&self) -> HelperMode {
        self.descriptor.mode
    }

    pub fn priority(&self) -> i32 {
        self.descriptor.priority
    }

    pub fn depends_on(&self) -> &[String] {
        &self.descriptor.depends_on
    }

    pub fn origin(&self) -> Option<&str> {
        self.descriptor.origin.as_deref()
    }

    pub async fn apply(&self, args: A, next: &Next<'_>) -> Result<()> {
        self.apply.apply(args, next).await
    }
}

impl<A: Send + 'static> Clone for Helper<A> {
    fn clone(&self) -> Self {
        Self {
            descriptor: Arc::clone(&self.descriptor),
            apply: Arc::clone(&self.apply),
        }
    }
}

impl<A: Send + 'static> fmt::Debug for Helper<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Helper")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Fluent construction of a [`Helper`].
#[derive(Debug, Clone)]
pub struct HelperBuilder {
    descriptor: HelperDescriptor,
}

impl HelperBuilder {
    pub fn new(key: impl Into<String>, kind: impl Into<HelperKind>) -> Self {
        Self {
            descriptor: HelperDescriptor::new(key, kind),
        }
    }

    pub fn mode(mut self, mode: HelperMode) -> Self {
        self.descriptor.mode = mode;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.descriptor.priority = priority;
        self
    }

    pub fn depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor.depends_on = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.descriptor.origin = Some(origin.into());
        self
    }

    pub fn build<A: Send + 'static>(self, apply: impl HelperApply<A> + 'static) -> Helper<A> {
        Helper {
            descriptor: Arc::new(self.descriptor),
            apply: Arc::new(apply),
        }
    }
}

/// Plain-struct form of the helper factory input.
///
/// Unset optional fields take the defaults `extend`, `0`, and no dependencies.
pub struct HelperOptions<A: Send + 'static> {
    pub key: String,
    pub kind: HelperKind,
    pub mode: Option<HelperMode>,
    pub priority: Option<i32>,
    pub depends_on: Option<Vec<String>>,
    pub origin: Option<String>,
    pub apply: Arc<dyn HelperApply<A>>,
}

pub fn create_helper<A: Send + 'static>(options: HelperOptions<A>) -> Helper<A> {
    Helper {
        descriptor: Arc::new(HelperDescriptor {
            key: options.key,
            kind: options.kind,
            mode: options.mode.unwrap_or_default(),
            priority: options.priority.unwrap_or(0),
            depends_on: options.depends_on.unwrap_or_default(),
            origin: options.origin,
        }),
        apply: options.apply,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Noop;

    #[async_trait]
    impl HelperApply<()> for Noop {
        async fn apply(&self, _args: (), _next: &Next<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn create_helper_applies_defaults() {
        let helper = create_helper(HelperOptions {
            key: "meta".into(),
            kind: HelperKind::Fragment,
            mode: None,
            priority: None,
            depends_on: None,
            origin: None,
            apply: Arc::new(Noop),
        });

        assert_eq!(helper.key(), "meta");
        assert_eq!(helper.kind(), &HelperKind::Fragment);
        assert_eq!(helper.mode(), HelperMode::Extend);
        assert_eq!(helper.priority(), 0);
        assert!(helper.depends_on().is_empty());
        assert!(helper.origin().is_none());
    }

    #[test]
    fn builder_sets_every_field() {
        let helper: Helper<()> = HelperBuilder::new("builder.php", HelperKind::Builder)
            .mode(HelperMode::Override)
            .priority(10)
            .depends_on(["ir.meta", "ir.types"])
            .origin("php-driver")
            .build(Noop);

        let d = helper.descriptor();
        assert_eq!(d.mode, HelperMode::Override);
        assert_eq!(d.priority, 10);
        assert_eq!(d.depends_on, vec!["ir.meta", "ir.types"]);
        assert_eq!(d.label(), "php-driver");
    }

    #[test]
    fn clones_share_descriptor() {
        let helper: Helper<()> = HelperBuilder::new("a", "fragment").build(Noop);
        let copy = helper.clone();
        assert!(Arc::ptr_eq(&helper.shared_descriptor(), &copy.shared_descriptor()));
    }

    #[test]
    fn kind_round_trips_through_strings() {
        assert_eq!(HelperKind::from("fragment"), HelperKind::Fragment);
        assert_eq!(HelperKind::from("builder"), HelperKind::Builder);
        assert_eq!(
            HelperKind::from("validator"),
            HelperKind::Custom("validator".into())
        );
        assert_eq!(HelperKind::Custom("validator".into()).to_string(), "validator");
        assert_eq!(
            serde_json::to_string(&HelperKind::Builder).unwrap(),
            "\"builder\""
        );
    }

    #[test]
    fn mode_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&HelperMode::Override).unwrap(),
            "\"override\""
        );
        let mode: HelperMode = serde_json::from_str("\"merge\"").unwrap();
        assert_eq!(mode, HelperMode::Merge);
    }

    #[tokio::test]
    async fn helper_fn_runs_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let helper: Helper<usize> = HelperBuilder::new("count", HelperKind::Fragment).build(
            helper_fn(move |amount: usize| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(amount, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        let next = Next::detached();
        helper.apply(3, &next).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!next.was_called());
    }
}
