//! Property-based tests for setters and provider availability.
//!
//! 1. Numeric setters store exactly the values inside their range and leave
//!    the cached value alone (with one rejection event) for everything else.
//! 2. A bound provider can always be created, whatever sequence of
//!    assignments, creations, removals and policy changes led there.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use xnode_bind::{
    DoubleSetter, IntegerSetter, NumericCodec, ProviderGraph, ProviderId, SetOutcome, SetterEvent,
    StringCodec, StringSetter,
};

fn graph_with_attribute() -> (ProviderGraph, ProviderId) {
    let mut graph = ProviderGraph::new();
    let root = graph.add_root("doc").unwrap();
    let element = graph.add_element("Node", root).unwrap();
    let attribute = graph.add_attribute("Value", element).unwrap();
    graph.load_root(root, "<Node/>").unwrap();
    (graph, attribute)
}

fn rejections<T: Clone + 'static>(events: &Rc<RefCell<Vec<SetterEvent<T>>>>) -> usize {
    events
        .borrow()
        .iter()
        .filter(|event| matches!(event, SetterEvent::InvalidValueSubmitted { .. }))
        .count()
}

proptest! {
    #[test]
    fn integer_values_round_trip_inside_range(
        min in -1000i32..1000,
        span in 0i32..1000,
        values in prop::collection::vec(-3000i32..3000, 1..20),
    ) {
        let max = min + span;
        let (mut graph, attribute) = graph_with_attribute();
        let setter = IntegerSetter::new(
            &mut graph,
            attribute,
            NumericCodec::new().with_range(min, max).unwrap(),
        )
        .unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        setter.on_event(move |event| sink.borrow_mut().push(event.clone()));

        for value in values {
            let before = setter.value();
            let seen = rejections(&events);
            let outcome = setter.set_value(&mut graph, value).unwrap();
            if (min..=max).contains(&value) {
                prop_assert!(!matches!(outcome, SetOutcome::Rejected(_)));
                prop_assert_eq!(setter.value(), value);
                let stored = graph.raw_value(attribute);
                prop_assert_eq!(stored, Some(value.to_string()));
            } else {
                prop_assert!(matches!(outcome, SetOutcome::Rejected(_)));
                prop_assert_eq!(setter.value(), before);
                prop_assert_eq!(rejections(&events), seen + 1);
            }
        }
    }

    #[test]
    fn double_values_round_trip_through_text(value in -1.0e12f64..1.0e12) {
        let (mut graph, attribute) = graph_with_attribute();
        let setter = DoubleSetter::new(&mut graph, attribute, NumericCodec::new()).unwrap();
        setter.set_value(&mut graph, value).unwrap();
        prop_assert_eq!(setter.value(), value);

        let reread = DoubleSetter::new(&mut graph, attribute, NumericCodec::new()).unwrap();
        prop_assert_eq!(reread.value(), value);
    }

    #[test]
    fn pattern_mismatch_leaves_text_untouched(value in "[a-z0-9]{0,8}") {
        let (mut graph, attribute) = graph_with_attribute();
        let setter = StringSetter::new(
            &mut graph,
            attribute,
            StringCodec::with_pattern("^[a-z]+$").unwrap(),
        )
        .unwrap();
        setter.set_value(&mut graph, "seed".into()).unwrap();
        let outcome = setter.set_value(&mut graph, value.clone()).unwrap();
        let valid = !value.is_empty() && value.chars().all(|c| c.is_ascii_lowercase());
        if valid {
            prop_assert_eq!(setter.value(), value);
        } else {
            prop_assert!(matches!(outcome, SetOutcome::Rejected(_)));
            prop_assert_eq!(setter.value(), "seed");
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Load(&'static str),
    Clear,
    Create(usize),
    Remove(usize),
    SetCreation(usize, bool),
}

const DOCUMENTS: &[&str] = &[
    "<A/>",
    "<A><B/></A>",
    r#"<A><B C="1"><D/></B></A>"#,
    "<Other/>",
];

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::sample::select(DOCUMENTS).prop_map(Op::Load),
        Just(Op::Clear),
        (0usize..5).prop_map(Op::Create),
        (0usize..5).prop_map(Op::Remove),
        ((0usize..5), any::<bool>()).prop_map(|(index, enabled)| Op::SetCreation(index, enabled)),
    ]
}

proptest! {
    #[test]
    fn available_implies_creatable(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let a = graph.add_element("A", root).unwrap();
        let b = graph.add_element("B", a).unwrap();
        let c = graph.add_attribute("C", b).unwrap();
        let d = graph.add_element("D", b).unwrap();
        let providers = [root, a, b, c, d];

        for op in ops {
            // Failures are expected for some sequences; only the invariant matters.
            let _ = match op {
                Op::Load(xml) => graph.load_root(root, xml).map(|_| ()),
                Op::Clear => graph.assign_root(root, None),
                Op::Create(index) => graph.create_if_missing(providers[index]).map(|_| ()),
                Op::Remove(index) => graph.remove(providers[index]),
                Op::SetCreation(index, enabled) => {
                    graph.set_creation_enabled(providers[index], enabled)
                }
            };
            for provider in providers {
                prop_assert!(!graph.is_available(provider) || graph.can_be_created(provider));
            }
        }
    }
}
