//! Typed value setters layered over a single provider.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt::{self, Debug, Display};
use std::rc::{Rc, Weak};
use std::str::FromStr;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::provider::{
    ProviderEvent, ProviderGraph, ProviderId, ProviderListener, SubscriptionId,
};
use crate::BindError;

/// Reason a proposed value was not written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("value {value} outside range [{min}, {max}]")]
    OutOfRange {
        value: String,
        min: String,
        max: String,
    },
    #[error("value {value:?} does not match pattern {pattern}")]
    PatternMismatch { value: String, pattern: String },
    #[error("an indeterminate value requires three-state mode")]
    NotThreeState,
    #[error("selection index {index} out of range for {len} items")]
    SelectionOutOfRange { index: usize, len: usize },
}

/// Conversion between a provider's raw string and a typed value.
pub trait ValueCodec {
    type Value: Clone + PartialEq + Debug + 'static;

    /// Typed value for a raw string; absent or unparsable text yields the
    /// codec's default.
    fn decode(&self, raw: Option<&str>) -> Self::Value;

    /// Raw string to store, or `None` to remove the stored value.
    fn encode(&self, value: &Self::Value) -> Result<Option<String>, ValidationError>;
}

/// Identity codec with an optional pattern the proposed value must match.
#[derive(Debug, Clone, Default)]
pub struct StringCodec {
    pattern: Option<Regex>,
}

impl StringCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pattern(pattern: &str) -> Result<Self, BindError> {
        Ok(StringCodec {
            pattern: Some(compile_pattern(pattern)?),
        })
    }

    pub fn pattern(&self) -> Option<&Regex> {
        self.pattern.as_ref()
    }
}

impl ValueCodec for StringCodec {
    type Value = String;

    fn decode(&self, raw: Option<&str>) -> String {
        raw.unwrap_or_default().to_string()
    }

    fn encode(&self, value: &String) -> Result<Option<String>, ValidationError> {
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(value) {
                return Err(ValidationError::PatternMismatch {
                    value: value.clone(),
                    pattern: pattern.as_str().to_string(),
                });
            }
        }
        Ok(Some(value.clone()))
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, BindError> {
    Regex::new(pattern).map_err(|err| BindError::Config(format!("invalid pattern: {err}")))
}

/// Number types usable with [`NumericCodec`].
pub trait Numeric: Copy + PartialOrd + Display + FromStr + Default + Debug + 'static {
    const LOWEST: Self;
    const HIGHEST: Self;

    /// Move by `step` in either direction without overflowing.
    fn offset(self, step: Self, up: bool) -> Self;
}

macro_rules! impl_numeric_int {
    ($($ty:ty),*) => {
        $(
            impl Numeric for $ty {
                const LOWEST: Self = <$ty>::MIN;
                const HIGHEST: Self = <$ty>::MAX;

                fn offset(self, step: Self, up: bool) -> Self {
                    if up {
                        self.saturating_add(step)
                    } else {
                        self.saturating_sub(step)
                    }
                }
            }
        )*
    };
}

impl_numeric_int!(i32, i64);

impl Numeric for f64 {
    const LOWEST: Self = f64::MIN;
    const HIGHEST: Self = f64::MAX;

    fn offset(self, step: Self, up: bool) -> Self {
        if up {
            self + step
        } else {
            self - step
        }
    }
}

/// Decimal text with inclusive `[min, max]` bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericCodec<N> {
    min: N,
    max: N,
}

impl<N: Numeric> Default for NumericCodec<N> {
    fn default() -> Self {
        NumericCodec {
            min: N::LOWEST,
            max: N::HIGHEST,
        }
    }
}

impl<N: Numeric> NumericCodec<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, min: N, max: N) -> Result<Self, BindError> {
        self.set_range(min, max)?;
        Ok(self)
    }

    pub fn minimum(&self) -> N {
        self.min
    }

    pub fn maximum(&self) -> N {
        self.max
    }

    /// Replace both bounds. Rejects `max < min` and incomparable bounds.
    pub fn set_range(&mut self, min: N, max: N) -> Result<(), BindError> {
        match min.partial_cmp(&max) {
            Some(Ordering::Less | Ordering::Equal) => {
                self.min = min;
                self.max = max;
                Ok(())
            }
            Some(Ordering::Greater) | None => Err(BindError::InvalidRange {
                min: min.to_string(),
                max: max.to_string(),
            }),
        }
    }

    pub fn contains(&self, value: N) -> bool {
        value >= self.min && value <= self.max
    }
}

impl<N: Numeric> ValueCodec for NumericCodec<N> {
    type Value = N;

    fn decode(&self, raw: Option<&str>) -> N {
        raw.and_then(|raw| raw.trim().parse().ok())
            .unwrap_or_default()
    }

    fn encode(&self, value: &N) -> Result<Option<String>, ValidationError> {
        if !self.contains(*value) {
            return Err(ValidationError::OutOfRange {
                value: value.to_string(),
                min: self.min.to_string(),
                max: self.max.to_string(),
            });
        }
        Ok(Some(value.to_string()))
    }
}

/// Text pair used to store booleans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BooleanConverter {
    true_text: String,
    false_text: String,
}

impl BooleanConverter {
    pub fn new(true_text: &str, false_text: &str) -> Result<Self, BindError> {
        let (true_text, false_text) = (true_text.trim(), false_text.trim());
        if true_text.is_empty() || false_text.is_empty() {
            return Err(BindError::Config("boolean texts must not be empty".into()));
        }
        if true_text.eq_ignore_ascii_case(false_text) {
            return Err(BindError::Config(format!(
                "boolean texts must differ, both are {true_text:?}"
            )));
        }
        Ok(BooleanConverter {
            true_text: true_text.to_string(),
            false_text: false_text.to_string(),
        })
    }

    /// `"1"` / `"0"`.
    pub fn binary() -> Self {
        BooleanConverter {
            true_text: "1".into(),
            false_text: "0".into(),
        }
    }

    /// `"true"` / `"false"`.
    pub fn words() -> Self {
        BooleanConverter {
            true_text: "true".into(),
            false_text: "false".into(),
        }
    }

    pub fn to_text(&self, value: bool) -> &str {
        if value {
            &self.true_text
        } else {
            &self.false_text
        }
    }

    pub fn parse(&self, raw: &str) -> Option<bool> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case(&self.true_text) {
            Some(true)
        } else if raw.eq_ignore_ascii_case(&self.false_text) {
            Some(false)
        } else {
            None
        }
    }
}

impl Default for BooleanConverter {
    fn default() -> Self {
        Self::words()
    }
}

/// Boolean codec. In three-state mode `None` means "no stored value".
#[derive(Debug, Clone, Default)]
pub struct BooleanCodec {
    converter: BooleanConverter,
    three_state: bool,
}

impl BooleanCodec {
    pub fn new(converter: BooleanConverter) -> Self {
        BooleanCodec {
            converter,
            three_state: false,
        }
    }

    pub fn three_state(mut self, three_state: bool) -> Self {
        self.three_state = three_state;
        self
    }

    pub fn is_three_state(&self) -> bool {
        self.three_state
    }

    pub fn converter(&self) -> &BooleanConverter {
        &self.converter
    }
}

impl ValueCodec for BooleanCodec {
    type Value = Option<bool>;

    fn decode(&self, raw: Option<&str>) -> Option<bool> {
        match raw.and_then(|raw| self.converter.parse(raw)) {
            Some(value) => Some(value),
            None if self.three_state => None,
            None => Some(false),
        }
    }

    fn encode(&self, value: &Option<bool>) -> Result<Option<String>, ValidationError> {
        match value {
            Some(value) => Ok(Some(self.converter.to_text(*value).to_string())),
            None if self.three_state => Ok(None),
            None => Err(ValidationError::NotThreeState),
        }
    }
}

/// Result of [`ValueSetter::set_value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    /// The encoded value was written.
    Committed,
    /// The tree already held the encoded value.
    Unchanged,
    /// Validation failed; the tree was not touched.
    Rejected(ValidationError),
}

/// Notification raised by a setter.
#[derive(Debug, Clone, PartialEq)]
pub enum SetterEvent<T> {
    ValueChanged { old: T, new: T },
    InvalidValueSubmitted { value: T, reason: ValidationError },
}

type Handler<T> = Box<dyn FnMut(&SetterEvent<T>)>;

/// Typed get/set over one provider with validation before commit.
///
/// Clones share state. The graph holds the setter weakly, so dropping
/// every clone releases it; [`ValueSetter::detach`] unsubscribes eagerly.
pub struct ValueSetter<C: ValueCodec> {
    inner: Rc<SetterInner<C>>,
}

pub type StringSetter = ValueSetter<StringCodec>;
pub type IntegerSetter = ValueSetter<NumericCodec<i32>>;
pub type LongSetter = ValueSetter<NumericCodec<i64>>;
pub type DoubleSetter = ValueSetter<NumericCodec<f64>>;
pub type BooleanSetter = ValueSetter<BooleanCodec>;

struct SetterInner<C: ValueCodec> {
    provider: ProviderId,
    codec: RefCell<C>,
    cached: RefCell<C::Value>,
    setting: Cell<bool>,
    subscription: Cell<Option<SubscriptionId>>,
    handlers: RefCell<Vec<Handler<C::Value>>>,
}

/// Raises the "setting value" flag for its lifetime.
struct SettingGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> SettingGuard<'a> {
    fn acquire(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        SettingGuard { flag }
    }
}

impl Drop for SettingGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

impl<C: ValueCodec> SetterInner<C> {
    fn store(&self, fresh: C::Value) {
        let old = self.cached.replace(fresh.clone());
        if old != fresh {
            self.emit(&SetterEvent::ValueChanged { old, new: fresh });
        }
    }

    fn emit(&self, event: &SetterEvent<C::Value>) {
        let mut handlers = self.handlers.take();
        for handler in handlers.iter_mut() {
            handler(event);
        }
        // Keep handlers registered while emitting.
        let mut slot = self.handlers.borrow_mut();
        let added = std::mem::replace(&mut *slot, handlers);
        slot.extend(added);
    }
}

impl<C: ValueCodec> ProviderListener for SetterInner<C> {
    fn on_provider_event(&self, event: &ProviderEvent) {
        if self.setting.get() {
            trace!(provider = ?self.provider, kind = ?event.kind, "ignoring own write");
            return;
        }
        // An element's value is the text of its whole subtree, so descendant
        // changes can move it too. `store` drops the ones that do not.
        let fresh = self.codec.borrow().decode(event.raw_value.as_deref());
        self.store(fresh);
    }
}

impl<C: ValueCodec + 'static> ValueSetter<C> {
    /// Attach a setter to `provider`, reading its current value.
    pub fn new(graph: &mut ProviderGraph, provider: ProviderId, codec: C) -> Result<Self, BindError> {
        graph.kind(provider)?;
        let cached = codec.decode(graph.raw_value(provider).as_deref());
        let inner = Rc::new(SetterInner {
            provider,
            codec: RefCell::new(codec),
            cached: RefCell::new(cached),
            setting: Cell::new(false),
            subscription: Cell::new(None),
            handlers: RefCell::new(Vec::new()),
        });
        let listener: Weak<dyn ProviderListener> = Rc::downgrade(&inner) as Weak<dyn ProviderListener>;
        let subscription = graph.subscribe_listener(provider, listener)?;
        inner.subscription.set(Some(subscription));
        Ok(ValueSetter { inner })
    }

    pub fn provider(&self) -> ProviderId {
        self.inner.provider
    }

    /// Cached typed value.
    ///
    /// On an element provider that discriminates descendants, text changes
    /// below its direct children are not announced; [`ValueSetter::refresh`]
    /// or the next [`ValueSetter::set_value`] picks them up.
    pub fn value(&self) -> C::Value {
        self.inner.cached.borrow().clone()
    }

    /// Whether a write from this setter is in progress.
    pub fn is_setting_value(&self) -> bool {
        self.inner.setting.get()
    }

    pub fn on_event(&self, handler: impl FnMut(&SetterEvent<C::Value>) + 'static) {
        self.inner.handlers.borrow_mut().push(Box::new(handler));
    }

    /// Validate, encode and write `value`, materialising the node if needed.
    ///
    /// Invalid values raise [`SetterEvent::InvalidValueSubmitted`] and
    /// leave the tree untouched.
    pub fn set_value(
        &self,
        graph: &mut ProviderGraph,
        value: C::Value,
    ) -> Result<SetOutcome, BindError> {
        let provider = self.inner.provider;
        let encoded = self.inner.codec.borrow().encode(&value);
        let encoded = match encoded {
            Ok(encoded) => encoded,
            Err(reason) => {
                warn!(?provider, ?value, %reason, "rejected value");
                self.inner.emit(&SetterEvent::InvalidValueSubmitted {
                    value,
                    reason: reason.clone(),
                });
                return Ok(SetOutcome::Rejected(reason));
            }
        };
        if graph.raw_value(provider) == encoded {
            self.refresh(graph);
            return Ok(SetOutcome::Unchanged);
        }

        let written = {
            let _guard = SettingGuard::acquire(&self.inner.setting);
            graph.set_raw_value(provider, encoded.as_deref())
        };
        self.refresh(graph);
        written?;
        debug!(?provider, raw = ?encoded, "committed value");
        Ok(SetOutcome::Committed)
    }

    /// Re-derive the cached value from the provider.
    pub fn refresh(&self, graph: &ProviderGraph) {
        let fresh = self
            .inner
            .codec
            .borrow()
            .decode(graph.raw_value(self.inner.provider).as_deref());
        self.inner.store(fresh);
    }

    /// Stop following the provider. Returns whether a subscription was active.
    pub fn detach(&self, graph: &mut ProviderGraph) -> bool {
        match self.inner.subscription.take() {
            Some(subscription) => graph.unsubscribe(self.inner.provider, subscription),
            None => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.subscription.get().is_some()
    }
}

impl StringSetter {
    pub fn pattern(&self) -> Option<String> {
        self.inner
            .codec
            .borrow()
            .pattern()
            .map(|pattern| pattern.as_str().to_string())
    }

    /// Replace the pattern; it applies to future writes only.
    pub fn set_pattern(&self, pattern: Option<&str>) -> Result<(), BindError> {
        let compiled = pattern.map(compile_pattern).transpose()?;
        self.inner.codec.borrow_mut().pattern = compiled;
        Ok(())
    }
}

impl<N: Numeric> ValueSetter<NumericCodec<N>> {
    pub fn minimum(&self) -> N {
        self.inner.codec.borrow().minimum()
    }

    pub fn maximum(&self) -> N {
        self.inner.codec.borrow().maximum()
    }

    /// Applies to future writes; the cached value is kept as stored.
    pub fn set_range(&self, min: N, max: N) -> Result<(), BindError> {
        self.inner.codec.borrow_mut().set_range(min, max)
    }

    pub fn set_minimum(&self, min: N) -> Result<(), BindError> {
        let max = self.maximum();
        self.set_range(min, max)
    }

    pub fn set_maximum(&self, max: N) -> Result<(), BindError> {
        let min = self.minimum();
        self.set_range(min, max)
    }
}

impl BooleanSetter {
    pub fn is_three_state(&self) -> bool {
        self.inner.codec.borrow().is_three_state()
    }

    /// Switch three-state mode and re-read the stored value under it.
    pub fn set_three_state(&self, graph: &ProviderGraph, three_state: bool) {
        self.inner.codec.borrow_mut().three_state = three_state;
        self.refresh(graph);
    }

    /// `true` becomes `false`; `false` and indeterminate become `true`.
    pub fn toggle(&self, graph: &mut ProviderGraph) -> Result<SetOutcome, BindError> {
        let next = match self.value() {
            Some(true) => Some(false),
            Some(false) | None => Some(true),
        };
        self.set_value(graph, next)
    }
}

impl<C: ValueCodec> Clone for ValueSetter<C> {
    fn clone(&self) -> Self {
        ValueSetter {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<C: ValueCodec> fmt::Debug for ValueSetter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueSetter")
            .field("provider", &self.inner.provider)
            .field("value", &*self.inner.cached.borrow())
            .finish()
    }
}
