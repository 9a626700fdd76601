use xnode_bind::{
    BooleanCodec, BooleanConverter, BooleanSetter, CheckBoxDefinition, ComboBoxDefinition,
    IntegerSetter, NumericCodec, NumericUpDownDefinition, ProviderGraph, SetterEvent, StringCodec,
    StringSetter,
};

const SETTINGS: &str = r#"<Settings>
    <Display Theme="dark" Brightness="60"/>
</Settings>"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut graph = ProviderGraph::new();
    let root = graph.add_root("settings")?;
    let settings = graph.add_element("Settings", root)?;
    let display = graph.add_element("Display", settings)?;
    let theme = graph.add_attribute("Theme", display)?;
    let brightness = graph.add_attribute("Brightness", display)?;
    let audio = graph.add_element("Audio", settings)?;
    let muted = graph.add_attribute("Muted", audio)?;

    graph.subscribe(audio, |event| println!("audio: {:?}", event.kind))?;
    graph.load_root(root, SETTINGS)?;

    let theme = ComboBoxDefinition::new(
        StringSetter::new(&mut graph, theme, StringCodec::new())?,
        ["light", "dark"],
    );
    let brightness = IntegerSetter::new(
        &mut graph,
        brightness,
        NumericCodec::new().with_range(0, 100)?,
    )?;
    brightness.on_event(|event| match event {
        SetterEvent::ValueChanged { old, new } => println!("brightness {old} -> {new}"),
        SetterEvent::InvalidValueSubmitted { value, reason } => {
            println!("brightness {value} rejected: {reason}")
        }
    });
    let stepper = NumericUpDownDefinition::new(brightness.clone(), 25)?;
    let muted = CheckBoxDefinition::new(BooleanSetter::new(
        &mut graph,
        muted,
        BooleanCodec::new(BooleanConverter::binary()),
    )?);

    println!("theme = {:?}", theme.selected_item());
    theme.select(&mut graph, 0)?;
    stepper.increment(&mut graph)?;
    stepper.increment(&mut graph)?;
    brightness.set_value(&mut graph, 150)?;
    muted.toggle(&mut graph)?;

    if let Some(document) = graph.node(root) {
        println!("{}", graph.tree().to_string(document)?);
    }
    Ok(())
}
