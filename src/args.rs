use clap::Parser;

/// Replays a ranked-choice trip decision and prints its outcome.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The JSON session to replay: candidates, roster, rules, ballot sources
    /// and voter actions. The format is described in the manual of the trip_decision crate.
    #[clap(short, long, value_parser)]
    pub config: String,

    /// (file path) A reference file containing the summary of a session in JSON format. If
    /// provided, packvote will check that the computed summary matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (file path, 'stdout' or empty) If specified, the summary of the session will be written
    /// in JSON format to the given location.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_required() {
        assert!(Args::try_parse_from(["packvote"]).is_err());
        assert!(Args::try_parse_from(["packvote", "--verbose"]).is_err());

        let args = Args::try_parse_from(["packvote", "-c", "trip.json", "--out", "stdout"]).unwrap();
        assert_eq!(args.config, "trip.json");
        assert_eq!(args.out.as_deref(), Some("stdout"));
        assert_eq!(args.reference, None);
        assert!(!args.verbose);
    }
}
