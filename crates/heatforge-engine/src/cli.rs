//! Command-line arguments.

use std::path::PathBuf;

use clap::builder::{NonEmptyStringValueParser, TypedValueParser};
use clap::{Args, Parser, ValueHint};
use heatforge_types::{EventKindFilter, MapId, ToneParams};

/// Aggregates the events of every match file into one heatmap over a map
/// and writes it as a PNG.
#[derive(Debug, Clone, PartialEq, Parser)]
#[command(name = "heatforge-engine", version, about)]
pub struct CliArgs {
    /// Configuration file (default: ./heatforge.yaml if present)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Map the heatmap is drawn over; must be listed in the configuration
    #[arg(long = "map", value_name = "MAP", value_parser = NonEmptyStringValueParser::new().map(MapId::new))]
    pub map_id: MapId,

    /// Event kinds that contribute: any, footstep, death, or other
    #[arg(long = "kind", value_name = "KIND", default_value = "any", value_parser = parse_filter)]
    pub filter: EventKindFilter,

    /// Output PNG
    #[arg(long, default_value = "heatmap.png", value_hint = ValueHint::FilePath)]
    pub out: PathBuf,

    #[command(flatten)]
    pub tone: ToneOverrides,

    /// Print the session status as JSON after rendering
    #[arg(long = "status")]
    pub print_status: bool,

    /// One JSON-lines event file per match
    #[arg(value_name = "MATCH.jsonl", required = true, value_hint = ValueHint::FilePath)]
    pub files: Vec<PathBuf>,
}

/// Tone controls overriding the configured default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Args)]
pub struct ToneOverrides {
    /// Additive offset applied after contrast
    #[arg(long, value_name = "B", allow_negative_numbers = true)]
    pub brightness: Option<f64>,

    /// Scale around 0.5 applied after gamma
    #[arg(long, value_name = "C")]
    pub contrast: Option<f64>,

    /// Exponent applied to normalized density (> 0)
    #[arg(long, value_name = "G")]
    pub gamma: Option<f64>,

    /// Gaussian blur sigma in full-resolution cells
    #[arg(long = "smoothing", value_name = "SIGMA")]
    pub smoothing_sigma: Option<f64>,
}

impl ToneOverrides {
    /// `base` with every given override applied.
    pub fn apply(&self, base: ToneParams) -> ToneParams {
        ToneParams {
            brightness: self.brightness.unwrap_or(base.brightness),
            contrast: self.contrast.unwrap_or(base.contrast),
            gamma: self.gamma.unwrap_or(base.gamma),
            smoothing_sigma: self.smoothing_sigma.unwrap_or(base.smoothing_sigma),
        }
    }
}

fn parse_filter(text: &str) -> Result<EventKindFilter, String> {
    EventKindFilter::parse(text).ok_or_else(|| format!("unknown event kind `{text}` (expected any, footstep, death, or other)"))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use clap::error::ErrorKind;
    use heatforge_types::EventKind;

    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs, clap::Error> {
        CliArgs::try_parse_from(std::iter::once("heatforge-engine").chain(args.iter().copied()))
    }

    #[test]
    fn command_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parses_a_full_command_line() {
        let parsed = parse(&[
            "--map",
            "de_dust2",
            "--kind",
            "deaths",
            "--gamma",
            "0.5",
            "--brightness",
            "-0.25",
            "--out",
            "deaths.png",
            "a.jsonl",
            "b.jsonl",
        ]);
        assert!(parsed.is_ok(), "{parsed:?}");
        let Ok(args) = parsed else { return };
        assert_eq!(args.map_id, MapId::from("de_dust2"));
        assert_eq!(args.filter, EventKindFilter::Only(EventKind::Death));
        assert_eq!(args.out, PathBuf::from("deaths.png"));
        assert_eq!(args.files.len(), 2);
        assert_eq!(args.tone.gamma, Some(0.5));
        assert_eq!(args.tone.brightness, Some(-0.25));
        assert!(args.config.is_none());
        assert!(!args.print_status);
    }

    #[test]
    fn defaults_apply_when_flags_are_omitted() {
        let parsed = parse(&["--map", "de_nuke", "a.jsonl"]);
        assert!(parsed.is_ok(), "{parsed:?}");
        let Ok(args) = parsed else { return };
        assert_eq!(args.filter, EventKindFilter::Any);
        assert_eq!(args.out, PathBuf::from("heatmap.png"));
        assert_eq!(args.tone, ToneOverrides::default());
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let overrides = ToneOverrides {
            contrast: Some(2.0),
            ..ToneOverrides::default()
        };
        let tone = overrides.apply(ToneParams::IDENTITY);
        assert_eq!(tone, ToneParams { contrast: 2.0, ..ToneParams::IDENTITY });
    }

    #[test]
    fn map_and_files_are_required() {
        assert!(parse(&["a.jsonl"]).is_err_and(|error| error.kind() == ErrorKind::MissingRequiredArgument));
        assert!(parse(&["--map", "de_dust2"]).is_err_and(|error| error.kind() == ErrorKind::MissingRequiredArgument));
        assert!(parse(&["--map", "", "a.jsonl"]).is_err());
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(parse(&["--map", "de_dust2", "--gamma", "steep", "a.jsonl"]).is_err_and(|error| error.kind() == ErrorKind::ValueValidation));
        assert!(parse(&["--map", "de_dust2", "--kind", "grenade", "a.jsonl"]).is_err_and(|error| error.kind() == ErrorKind::ValueValidation));
        assert!(parse(&["--map", "de_dust2", "--verbose", "a.jsonl"]).is_err_and(|error| error.kind() == ErrorKind::UnknownArgument));
    }

    #[test]
    fn help_and_version_exit_successfully() {
        for flag in ["--help", "--version"] {
            let result = parse(&[flag]);
            assert!(result.is_err());
            let Err(error) = result else { return };
            assert!(matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion));
            assert_eq!(error.exit_code(), 0);
        }
    }
}
