//! Live node providers over an [`XmlTree`]: change classification, provider
//! availability tracking and typed value setters.
//!
//! A [`ProviderGraph`] owns the tree and an arena of providers. Each
//! provider names a location (`Root`, a child element by name, or an
//! attribute by name) and tracks whether that location currently exists.
//! [`ValueSetter`]s sit on top of a provider and convert its raw string to a
//! typed value with validation.
//!
//! ```rust
//! use xnode_bind::{IntegerSetter, NumericCodec, ProviderGraph, SetOutcome};
//!
//! let mut graph = ProviderGraph::new();
//! let root = graph.add_root("settings")?;
//! let settings = graph.add_element("Settings", root)?;
//! let display = graph.add_element("Display", settings)?;
//! let brightness = graph.add_attribute("Brightness", display)?;
//! let setter = IntegerSetter::new(&mut graph, brightness, NumericCodec::new().with_range(0, 100)?)?;
//!
//! graph.load_root(root, "<Settings/>")?;
//! assert_eq!(setter.set_value(&mut graph, 80)?, SetOutcome::Committed);
//! assert!(matches!(setter.set_value(&mut graph, 120)?, SetOutcome::Rejected(_)));
//! assert_eq!(setter.value(), 80);
//! # Ok::<(), xnode_bind::BindError>(())
//! ```

pub mod classify;
pub mod controls;
pub mod provider;
pub mod setter;

use thiserror::Error;

pub use xnode_tree::{Change, ChangeKind, NodeId, NodeKind, TreeError, XmlTree};

pub use classify::{classify_attribute, classify_container, Classification, ClassifyError};
pub use controls::{
    CheckBoxDefinition, ComboBoxDefinition, NumericUpDownDefinition, RadioButtonDefinition,
    TextBoxDefinition,
};
pub use provider::{
    AttributeOrder, ProviderEvent, ProviderEventKind, ProviderGraph, ProviderId, ProviderKind,
    ProviderListener, SubscriptionId,
};
pub use setter::{
    BooleanCodec, BooleanConverter, BooleanSetter, DoubleSetter, IntegerSetter, LongSetter,
    Numeric, NumericCodec, SetOutcome, SetterEvent, StringCodec, StringSetter, ValidationError,
    ValueCodec, ValueSetter,
};

/// Error type produced by provider and setter operations.
///
/// Validation failures are not errors; they are reported through
/// [`SetOutcome::Rejected`] and [`SetterEvent::InvalidValueSubmitted`].
#[derive(Debug, Error)]
pub enum BindError {
    /// The underlying tree rejected a mutation.
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// A change notification broke the classifier contract.
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    /// A provider or setter was configured inconsistently.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The provider id does not belong to this graph.
    #[error("unknown provider: {0:?}")]
    UnknownProvider(ProviderId),
    /// The provider or one of its ancestors cannot be materialised.
    #[error("provider cannot be created: {0}")]
    NotCreatable(String),
    /// The operation is not defined for this provider.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// The operation requires a bound provider.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// A range mutator was given a maximum below its minimum.
    #[error("invalid range: minimum {min} exceeds maximum {max}")]
    InvalidRange { min: String, max: String },
}
