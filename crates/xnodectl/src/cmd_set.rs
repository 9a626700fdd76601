use std::path::Path;

use anyhow::{anyhow, bail, Result};
use clap::ValueEnum;
use serde::Serialize;
use tracing::info;
use xnode_bind::{
    Numeric, NumericCodec, ProviderGraph, ProviderId, SetOutcome, StringCodec, ValueCodec,
    ValueSetter,
};

use crate::common::{self, Document, NodePath};

/// Type the value is validated as before it is written.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Int,
    Long,
    Double,
    Bool,
}

#[derive(Debug, Clone)]
pub struct SetArgs {
    pub path: String,
    pub value: String,
    pub kind: ValueKind,
    pub min: Option<String>,
    pub max: Option<String>,
    pub pattern: Option<String>,
    pub three_state: bool,
    pub binary: bool,
}

#[derive(Serialize)]
struct SetResponse<'a> {
    path: &'a str,
    outcome: &'static str,
    value: Option<String>,
}

pub fn run(file: &Path, args: SetArgs, json: bool) -> Result<()> {
    let mut doc = Document::load(file)?;
    let provider = doc.bind(&NodePath::parse(&args.path)?)?;
    let graph = &mut doc.graph;
    let outcome = match args.kind {
        ValueKind::String => {
            let codec = match &args.pattern {
                Some(pattern) => StringCodec::with_pattern(pattern)?,
                None => StringCodec::new(),
            };
            write(graph, provider, codec, args.value.clone())?
        }
        ValueKind::Int => write(
            graph,
            provider,
            numeric_codec::<i32>(&args)?,
            parse_number(&args.value, "value")?,
        )?,
        ValueKind::Long => write(
            graph,
            provider,
            numeric_codec::<i64>(&args)?,
            parse_number(&args.value, "value")?,
        )?,
        ValueKind::Double => write(
            graph,
            provider,
            numeric_codec::<f64>(&args)?,
            parse_number(&args.value, "value")?,
        )?,
        ValueKind::Bool => write(
            graph,
            provider,
            common::boolean_codec(args.binary, args.three_state),
            parse_bool(&args.value)?,
        )?,
    };

    let outcome = match outcome {
        SetOutcome::Rejected(reason) => {
            bail!("{:?} rejected for {}: {reason}", args.value, args.path)
        }
        SetOutcome::Committed => {
            doc.save()?;
            "committed"
        }
        SetOutcome::Unchanged => {
            info!(path = %args.path, "value unchanged, file left as is");
            "unchanged"
        }
    };
    let value = doc.graph.raw_value(provider);

    if json {
        let payload = SetResponse {
            path: &args.path,
            outcome,
            value,
        };
        common::print_json(&payload)?;
    } else {
        println!("{}", value.unwrap_or_default());
    }

    Ok(())
}

fn write<C: ValueCodec + 'static>(
    graph: &mut ProviderGraph,
    provider: ProviderId,
    codec: C,
    value: C::Value,
) -> Result<SetOutcome> {
    let setter = ValueSetter::new(graph, provider, codec)?;
    let outcome = setter.set_value(graph, value)?;
    setter.detach(graph);
    Ok(outcome)
}

fn numeric_codec<N: Numeric>(args: &SetArgs) -> Result<NumericCodec<N>> {
    let codec = NumericCodec::<N>::new();
    let min = match &args.min {
        Some(text) => parse_number(text, "minimum")?,
        None => codec.minimum(),
    };
    let max = match &args.max {
        Some(text) => parse_number(text, "maximum")?,
        None => codec.maximum(),
    };
    Ok(codec.with_range(min, max)?)
}

fn parse_number<N: Numeric>(text: &str, what: &str) -> Result<N> {
    text.trim()
        .parse()
        .map_err(|_| anyhow!("invalid {what} {text:?}"))
}

fn parse_bool(text: &str) -> Result<Option<bool>> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        "" | "none" | "null" => Ok(None),
        other => bail!("invalid boolean {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    const SETTINGS: &str = r#"<Settings><Display Brightness="40"/></Settings>"#;

    fn settings_file() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("settings.xml");
        fs::write(&file, SETTINGS).unwrap();
        (dir, file)
    }

    fn args(path: &str, value: &str, kind: ValueKind) -> SetArgs {
        SetArgs {
            path: path.into(),
            value: value.into(),
            kind,
            min: None,
            max: None,
            pattern: None,
            three_state: false,
            binary: false,
        }
    }

    #[test]
    fn writes_value_within_range() {
        let (_dir, file) = settings_file();
        let mut set = args("Settings/Display@Brightness", "75", ValueKind::Int);
        set.min = Some("0".into());
        set.max = Some("100".into());
        run(&file, set, false).expect("set");
        let saved = fs::read_to_string(&file).unwrap();
        assert!(saved.contains(r#"Brightness="75""#));
    }

    #[test]
    fn rejected_value_leaves_file_alone() {
        let (_dir, file) = settings_file();
        let mut set = args("Settings/Display@Brightness", "175", ValueKind::Int);
        set.max = Some("100".into());
        assert!(run(&file, set, false).is_err());
        assert_eq!(fs::read_to_string(&file).unwrap(), SETTINGS);
    }

    #[test]
    fn creates_missing_elements() {
        let (_dir, file) = settings_file();
        let mut set = args("Settings/Audio/Device", "speakers", ValueKind::String);
        set.pattern = Some("^[a-z]+$".into());
        run(&file, set, true).expect("set");
        let saved = fs::read_to_string(&file).unwrap();
        assert!(saved.contains("<Audio><Device>speakers</Device></Audio>"));
    }

    #[test]
    fn three_state_none_removes_attribute() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("flags.xml");
        fs::write(&file, r#"<Flags Muted="1"/>"#).unwrap();
        let mut set = args("Flags@Muted", "none", ValueKind::Bool);
        set.three_state = true;
        set.binary = true;
        run(&file, set, false).expect("set");
        assert!(!fs::read_to_string(&file).unwrap().contains("Muted"));
    }

    #[test]
    fn rejects_bad_input() {
        let (_dir, file) = settings_file();
        assert!(run(&file, args("Settings/Display@Brightness", "bright", ValueKind::Int), false)
            .is_err());
        let mut inverted = args("Settings/Display@Brightness", "5", ValueKind::Long);
        inverted.min = Some("10".into());
        inverted.max = Some("1".into());
        assert!(run(&file, inverted, false).is_err());
        assert!(parse_bool("maybe").is_err());
        assert_eq!(parse_bool(" On ").unwrap(), Some(true));
    }
}
