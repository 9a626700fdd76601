//! Control-shaped adapters over setters. They hold no state of their own
//! beyond configuration; every read goes through the setter's cache.

use tracing::warn;

use crate::provider::ProviderGraph;
use crate::setter::{
    BooleanSetter, Numeric, NumericCodec, SetOutcome, StringSetter, ValidationError, ValueSetter,
};
use crate::BindError;

/// Two- or three-state check box.
#[derive(Debug, Clone)]
pub struct CheckBoxDefinition {
    setter: BooleanSetter,
}

impl CheckBoxDefinition {
    pub fn new(setter: BooleanSetter) -> Self {
        CheckBoxDefinition { setter }
    }

    pub fn setter(&self) -> &BooleanSetter {
        &self.setter
    }

    /// `None` is the indeterminate state.
    pub fn is_checked(&self) -> Option<bool> {
        self.setter.value()
    }

    pub fn set_checked(
        &self,
        graph: &mut ProviderGraph,
        checked: Option<bool>,
    ) -> Result<SetOutcome, BindError> {
        self.setter.set_value(graph, checked)
    }

    pub fn toggle(&self, graph: &mut ProviderGraph) -> Result<SetOutcome, BindError> {
        self.setter.toggle(graph)
    }
}

/// One option of a radio group. Buttons of a group share a setter.
#[derive(Debug, Clone)]
pub struct RadioButtonDefinition {
    setter: StringSetter,
    option: String,
}

impl RadioButtonDefinition {
    pub fn new(setter: StringSetter, option: impl Into<String>) -> Self {
        RadioButtonDefinition {
            setter,
            option: option.into(),
        }
    }

    pub fn option(&self) -> &str {
        &self.option
    }

    pub fn is_checked(&self) -> bool {
        self.setter.value() == self.option
    }

    pub fn check(&self, graph: &mut ProviderGraph) -> Result<SetOutcome, BindError> {
        self.setter.set_value(graph, self.option.clone())
    }
}

/// Fixed list of choices stored as the chosen item's text.
#[derive(Debug, Clone)]
pub struct ComboBoxDefinition {
    setter: StringSetter,
    items: Vec<String>,
}

impl ComboBoxDefinition {
    pub fn new<I, S>(setter: StringSetter, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ComboBoxDefinition {
            setter,
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    /// Index of the stored value, if it is one of the items.
    pub fn selected_index(&self) -> Option<usize> {
        let value = self.setter.value();
        self.items.iter().position(|item| *item == value)
    }

    pub fn selected_item(&self) -> Option<&str> {
        self.selected_index().map(|index| self.items[index].as_str())
    }

    pub fn select(&self, graph: &mut ProviderGraph, index: usize) -> Result<SetOutcome, BindError> {
        match self.items.get(index) {
            Some(item) => self.setter.set_value(graph, item.clone()),
            None => {
                let reason = ValidationError::SelectionOutOfRange {
                    index,
                    len: self.items.len(),
                };
                warn!(provider = ?self.setter.provider(), %reason, "rejected selection");
                Ok(SetOutcome::Rejected(reason))
            }
        }
    }
}

/// Stepper over a bounded number.
#[derive(Debug, Clone)]
pub struct NumericUpDownDefinition<N: Numeric> {
    setter: ValueSetter<NumericCodec<N>>,
    step: N,
}

impl<N: Numeric> NumericUpDownDefinition<N> {
    /// `step` must be positive.
    pub fn new(setter: ValueSetter<NumericCodec<N>>, step: N) -> Result<Self, BindError> {
        if !(step > N::default()) {
            return Err(BindError::Config(format!("step must be positive, got {step}")));
        }
        Ok(NumericUpDownDefinition { setter, step })
    }

    pub fn value(&self) -> N {
        self.setter.value()
    }

    pub fn step(&self) -> N {
        self.step
    }

    pub fn increment(&self, graph: &mut ProviderGraph) -> Result<SetOutcome, BindError> {
        self.advance(graph, true)
    }

    pub fn decrement(&self, graph: &mut ProviderGraph) -> Result<SetOutcome, BindError> {
        self.advance(graph, false)
    }

    fn advance(&self, graph: &mut ProviderGraph, up: bool) -> Result<SetOutcome, BindError> {
        let (min, max) = (self.setter.minimum(), self.setter.maximum());
        let mut next = self.setter.value().offset(self.step, up);
        if next < min {
            next = min;
        }
        if next > max {
            next = max;
        }
        self.setter.set_value(graph, next)
    }
}

/// Free text entry, optionally pattern-checked by its setter.
#[derive(Debug, Clone)]
pub struct TextBoxDefinition {
    setter: StringSetter,
}

impl TextBoxDefinition {
    pub fn new(setter: StringSetter) -> Self {
        TextBoxDefinition { setter }
    }

    pub fn text(&self) -> String {
        self.setter.value()
    }

    pub fn set_text(
        &self,
        graph: &mut ProviderGraph,
        text: impl Into<String>,
    ) -> Result<SetOutcome, BindError> {
        self.setter.set_value(graph, text.into())
    }
}
