use log::{debug, info, warn};
use snafu::{prelude::*, Snafu};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use trip_decision::builder::Builder;
use trip_decision::*;

use crate::packvote::config_reader::*;
use crate::packvote::io_xlsx::SheetBallot;

mod io_xlsx;

#[derive(Debug, Snafu)]
pub enum SessionError {
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error reading JSON: {source}"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Column indexes are numbers starting at 1, got {content}"))]
    ParsingJsonNumber { content: String },
    #[snafu(display("Error writing file {path}"))]
    WritingOutput {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error opening file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("The spreadsheet has no worksheet or no header row"))]
    EmptyExcel {},
    #[snafu(display("Unexpected cell on row {lineno}: {content}"))]
    ExcelWrongCellType { lineno: u64, content: String },
    #[snafu(display("The session file has no parent directory"))]
    MissingParentDir {},
    #[snafu(display("Ballot provider {provider} is not supported"))]
    UnknownProvider { provider: String },
    #[snafu(display("Tally policy {policy} is not supported"))]
    UnknownRule { policy: String },
    #[snafu(display("Decision error: {source}"))]
    Decision { source: DecisionError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;

pub mod config_reader {
    use crate::packvote::*;

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct DecisionSettings {
        pub name: String,
        pub date: Option<String>,
    }

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct SessionRules {
        #[serde(rename = "tallyPolicy")]
        pub tally_policy: Option<String>,
    }

    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct BallotSource {
        pub provider: String,
        #[serde(rename = "filePath")]
        pub file_path: String,
        #[serde(rename = "voterColumnIndex")]
        _voter_column_index: Option<JSValue>,
        #[serde(rename = "firstChoiceColumnIndex")]
        _first_choice_column_index: Option<JSValue>,
        #[serde(rename = "excelWorksheetName")]
        pub excel_worksheet_name: Option<String>,
    }

    impl BallotSource {
        /// 0-based. Defaults to the first column.
        pub fn voter_column_index(&self) -> SessionResult<usize> {
            match &self._voter_column_index {
                None => Ok(0),
                x => Ok(read_js_int(x)? - 1),
            }
        }

        /// 0-based. Defaults to the column after the voter.
        pub fn first_choice_column_index(&self) -> SessionResult<usize> {
            match &self._first_choice_column_index {
                None => Ok(self.voter_column_index()? + 1),
                x => Ok(read_js_int(x)? - 1),
            }
        }
    }

    /// One scripted step of a session, applied in order.
    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "camelCase")]
    pub enum SessionAction {
        Submit {
            voter: VoterId,
            ranking: Vec<CandidateId>,
        },
        Skip {
            voter: VoterId,
        },
        Withdraw {
            voter: VoterId,
        },
        ResetVoter {
            voter: VoterId,
        },
        Finalize,
        Reset,
    }

    #[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct SessionConfig {
        pub decision: DecisionSettings,
        pub candidates: Vec<Candidate>,
        #[serde(default)]
        pub roster: Vec<String>,
        pub rules: Option<SessionRules>,
        #[serde(rename = "ballotSources", default)]
        pub ballot_sources: Vec<BallotSource>,
        #[serde(default)]
        pub actions: Vec<SessionAction>,
    }

    pub fn read_summary(path: String) -> SessionResult<JSValue> {
        let contents = fs::read_to_string(&path).context(OpeningJsonSnafu { path })?;
        debug!("read_summary: content: {:?}", contents);
        let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
        Ok(js)
    }

    fn read_js_int(x: &Option<JSValue>) -> SessionResult<usize> {
        let res = match x {
            Some(JSValue::Number(n)) => n.as_u64().map(|x| x as usize),
            Some(JSValue::String(s)) => s.parse::<usize>().ok(),
            _ => None,
        };
        res.filter(|x| *x >= 1).context(ParsingJsonNumberSnafu {
            content: format!("{:?}", x),
        })
    }
}

fn validate_rules(rules: &Option<SessionRules>) -> SessionResult<TallyPolicy> {
    match rules.as_ref().and_then(|r| r.tally_policy.as_deref()) {
        None => Ok(TallyPolicy::DEFAULT),
        Some("instantRunoff") => Ok(TallyPolicy::InstantRunoff),
        Some("borda") => Ok(TallyPolicy::Borda),
        Some(x) => UnknownRuleSnafu { policy: x }.fail(),
    }
}

fn read_ballot_source(root_path: &Path, source: &BallotSource) -> SessionResult<Vec<SheetBallot>> {
    let p: PathBuf = root_path.join(&source.file_path);
    let path = p.display().to_string();
    info!("read_ballot_source: reading {:?}", path);
    match source.provider.as_str() {
        "xlsx" => io_xlsx::read_xlsx_ballots(&path, source),
        x => UnknownProviderSnafu { provider: x }.fail(),
    }
}

// Spreadsheet cells may hold the label of a candidate instead of its id.
// Unknown entries are kept as they are and rejected by the ballot validation.
fn resolve_choices(registry: &CandidateRegistry, choices: &[String]) -> Vec<CandidateId> {
    choices
        .iter()
        .map(|s| match registry.resolve(s) {
            Some(c) => c.id.clone(),
            None => CandidateId::from(s.as_str()),
        })
        .collect()
}

fn apply_action(
    service: &DecisionService,
    round: &RoundId,
    action: &SessionAction,
) -> DecisionResult<()> {
    debug!("apply_action: {:?}", action);
    match action {
        SessionAction::Submit { voter, ranking } => {
            service.submit_ballot(round, voter, ranking).map(|_| ())
        }
        SessionAction::Skip { voter } => service.skip(round, voter),
        SessionAction::Withdraw { voter } => service.withdraw(round, voter),
        SessionAction::ResetVoter { voter } => service.reset_voter(round, voter),
        SessionAction::Finalize => service.finalize(round).map(|_| ()),
        SessionAction::Reset => service.reset(round),
    }
}

/// Replays a session and returns its summary.
///
/// Invalid ballots and refused actions do not stop the replay: they are
/// listed in the `rejected` section of the summary.
pub fn replay(config: &SessionConfig, root_path: &Path) -> SessionResult<JSValue> {
    let policy = validate_rules(&config.rules)?;
    let roster: Vec<&str> = config.roster.iter().map(|s| s.as_str()).collect();
    let round = Builder::new(policy)
        .candidates(&config.candidates)
        .roster(&roster)
        .build()
        .context(DecisionSnafu {})?;
    let registry = round.candidates().clone();

    let service = DecisionService::new();
    let log = Arc::new(EventLog::new());
    service.subscribe(log.clone());
    let round_id = RoundId::from(config.decision.name.as_str());
    service
        .open_round(round_id.clone(), round)
        .context(DecisionSnafu {})?;

    let mut rejected: Vec<JSValue> = Vec::new();

    for source in config.ballot_sources.iter() {
        let sheet = read_ballot_source(root_path, source)?;
        info!(
            "replay: {} ballots in {:?}",
            sheet.len(),
            source.file_path
        );
        for b in sheet {
            let ranking = resolve_choices(&registry, &b.choices);
            let voter = VoterId::from(b.voter.as_str());
            if let Err(e) = service.submit_ballot(&round_id, &voter, &ranking) {
                warn!("replay: row {} of {:?}: {}", b.lineno, source.file_path, e);
                rejected.push(json!({
                    "filePath": source.file_path,
                    "row": b.lineno,
                    "voter": voter,
                    "error": e.to_string(),
                }));
            }
        }
    }

    for (idx, action) in config.actions.iter().enumerate() {
        if let Err(e) = apply_action(&service, &round_id, action) {
            warn!("replay: action {} refused: {}", idx, e);
            rejected.push(json!({
                "action": idx,
                "error": e.to_string(),
            }));
        }
    }

    let events: Vec<DecisionEvent> = log.take().into_iter().map(|(_, e)| e).collect();
    build_summary_js(config, policy, &service, &round_id, rejected, events)
}

fn build_summary_js(
    config: &SessionConfig,
    policy: TallyPolicy,
    service: &DecisionService,
    round_id: &RoundId,
    rejected: Vec<JSValue>,
    events: Vec<DecisionEvent>,
) -> SessionResult<JSValue> {
    let (state, completion, voters, winner) = service
        .with_round(round_id, |r| {
            (
                r.state(),
                r.completion(),
                r.summary(),
                r.winner_candidate().cloned(),
            )
        })
        .context(DecisionSnafu {})?;
    let outcome = service.tally(round_id).context(DecisionSnafu {})?;
    Ok(json!({
        "config": {
            "decision": config.decision.name,
            "date": config.decision.date,
            "tallyPolicy": policy,
        },
        "state": state,
        "completion": completion,
        "voters": voters,
        "totalVoters": outcome.total_voters,
        "results": outcome.rounds,
        "winner": winner,
        "rejected": rejected,
        "events": events,
    }))
}

fn check_reference(summary_p: String, pretty_js_stats: &str) -> SessionResult<()> {
    let summary_ref = read_summary(summary_p)?;
    let pretty_js_summary_ref =
        serde_json::to_string_pretty(&summary_ref).context(ParsingJsonSnafu {})?;
    if pretty_js_summary_ref != pretty_js_stats {
        warn!("Found differences with the reference summary");
        print_diff(pretty_js_summary_ref.as_str(), pretty_js_stats, "\n");
        whatever!("Difference detected between computed summary and reference summary")
    }
    Ok(())
}

pub fn run_session(
    config_path: String,
    check_summary_path: Option<String>,
    out: Option<String>,
) -> SessionResult<()> {
    let config_p = Path::new(config_path.as_str());
    let config_str = fs::read_to_string(config_p).context(OpeningJsonSnafu {
        path: config_path.clone(),
    })?;
    let config: SessionConfig = serde_json::from_str(&config_str).context(ParsingJsonSnafu {})?;
    info!("config: {:?}", config);

    let root_p = config_p.parent().context(MissingParentDirSnafu {})?;
    let summary_js = replay(&config, root_p)?;
    let pretty_js_stats = serde_json::to_string_pretty(&summary_js).context(ParsingJsonSnafu {})?;

    match out.as_deref() {
        Some("stdout") => println!("{}", pretty_js_stats),
        Some(p) => {
            fs::write(p, &pretty_js_stats).context(WritingOutputSnafu { path: p })?;
            info!("run_session: summary written to {:?}", p);
        }
        None => println!("stats:{}", pretty_js_stats),
    }

    if let Some(summary_p) = check_summary_path {
        check_reference(summary_p, &pretty_js_stats)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn parse(s: &str) -> SessionConfig {
        serde_json::from_str(s).unwrap()
    }

    const SUMMER_TRIP: &str = r#"{
        "decision": { "name": "Summer trip", "date": "2026-06-01" },
        "candidates": [
            { "id": "A", "label": "Lisbon", "cost": 850.0 },
            { "id": "B", "label": "Kyoto", "cost": 1200.0 },
            { "id": "C", "label": "Reykjavik" }
        ],
        "roster": ["ana", "ben", "cleo", "dan"],
        "actions": [
            { "type": "submit", "voter": "ana", "ranking": ["A", "B"] },
            { "type": "submit", "voter": "ben", "ranking": ["B", "A"] },
            { "type": "submit", "voter": "cleo", "ranking": ["C", "B"] },
            { "type": "skip", "voter": "dan" },
            { "type": "finalize" }
        ]
    }"#;

    #[test]
    fn summer_trip() {
        init();
        let js = replay(&parse(SUMMER_TRIP), Path::new(".")).unwrap();
        assert_eq!(js["config"]["tallyPolicy"], json!("instantRunoff"));
        assert_eq!(js["state"], json!("finalized"));
        assert_eq!(js["completion"]["complete"], json!(true));
        assert_eq!(js["completion"]["skipped"], json!(1));
        assert_eq!(js["totalVoters"], json!(3));
        // Three-way tie in the first round: A has the lowest id.
        assert_eq!(js["results"][0]["eliminated"], json!("A"));
        assert_eq!(js["results"][1]["voteCounts"]["B"], json!(2));
        assert_eq!(js["winner"]["label"], json!("Kyoto"));
        assert_eq!(js["rejected"], json!([]));

        let events = js["events"].as_array().unwrap();
        assert_eq!(events.len(), 6);
        assert_eq!(events[4]["event"], json!("lifecycleChanged"));
        assert_eq!(events[5]["winnerCandidateId"], json!("B"));
    }

    #[test]
    fn refused_actions_are_reported() {
        init();
        let config = parse(
            r#"{
            "decision": { "name": "Weekend" },
            "candidates": [
                { "id": "A", "label": "Lisbon" },
                { "id": "B", "label": "Kyoto" },
                { "id": "C", "label": "Reykjavik" }
            ],
            "roster": ["ana", "ben", "cleo"],
            "actions": [
                { "type": "submit", "voter": "ana", "ranking": ["A", "Z"] },
                { "type": "submit", "voter": "ana", "ranking": ["A", "A"] },
                { "type": "submit", "voter": "ben", "ranking": [] },
                { "type": "resetVoter", "voter": "zoe" },
                { "type": "finalize" },
                { "type": "submit", "voter": "cleo", "ranking": ["A"] },
                { "type": "finalize" },
                { "type": "reset" },
                { "type": "submit", "voter": "cleo", "ranking": ["C"] }
            ]
        }"#,
        );
        let js = replay(&config, Path::new(".")).unwrap();
        let refused: Vec<u64> = js["rejected"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["action"].as_u64().unwrap())
            .collect();
        assert_eq!(refused, vec![0, 1, 2, 3, 5, 6]);
        assert_eq!(
            js["rejected"][0]["error"],
            json!("invalid input: candidate Z is not part of this round")
        );
        assert_eq!(
            js["rejected"][4]["error"],
            json!("voting is closed for this round")
        );
        assert_eq!(
            js["rejected"][5]["error"],
            json!("the round has already been finalized")
        );

        // Reset reopened the round; the last ballot is live but not committed.
        assert_eq!(js["state"], json!("open"));
        assert_eq!(js["winner"], JSValue::Null);
        assert_eq!(js["results"][0]["winner"], json!("C"));
        assert_eq!(js["events"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn borda_rules() {
        init();
        let config = parse(
            r#"{
            "decision": { "name": "Autumn" },
            "candidates": [
                { "id": "A", "label": "Paris", "cost": 1500 },
                { "id": "B", "label": "Tokyo", "cost": 900 },
                { "id": "C", "label": "Barcelona" }
            ],
            "roster": ["ana", "ben"],
            "rules": { "tallyPolicy": "borda" },
            "actions": [
                { "type": "submit", "voter": "ana", "ranking": ["A", "B", "C"] },
                { "type": "submit", "voter": "ben", "ranking": ["B", "A", "C"] },
                { "type": "finalize" }
            ]
        }"#,
        );
        let js = replay(&config, Path::new(".")).unwrap();
        assert_eq!(js["config"]["tallyPolicy"], json!("borda"));
        assert_eq!(js["results"].as_array().unwrap().len(), 1);
        assert_eq!(js["winner"]["id"], json!("B"));
    }

    #[test]
    fn invalid_sessions() {
        init();
        let mut config = parse(SUMMER_TRIP);
        config.rules = Some(SessionRules {
            tally_policy: Some("coinFlip".to_string()),
        });
        assert!(matches!(
            replay(&config, Path::new(".")),
            Err(SessionError::UnknownRule { .. })
        ));

        let mut config = parse(SUMMER_TRIP);
        config.candidates.push(Candidate::new("A", "Lisbon again"));
        assert!(matches!(
            replay(&config, Path::new(".")),
            Err(SessionError::Decision { .. })
        ));
    }

    #[test]
    fn ballot_sources() {
        init();
        let mut config = parse(SUMMER_TRIP);
        config.ballot_sources = vec![serde_json::from_value(json!({
            "provider": "csv",
            "filePath": "ballots.csv"
        }))
        .unwrap()];
        assert!(matches!(
            replay(&config, Path::new(".")),
            Err(SessionError::UnknownProvider { .. })
        ));

        config.ballot_sources = vec![serde_json::from_value(json!({
            "provider": "xlsx",
            "filePath": "no_such_file.xlsx",
            "voterColumnIndex": 1,
            "firstChoiceColumnIndex": "2"
        }))
        .unwrap()];
        assert!(matches!(
            replay(&config, Path::new(".")),
            Err(SessionError::OpeningExcel { .. })
        ));
    }

    #[test]
    fn column_indexes() {
        let source: BallotSource = serde_json::from_value(json!({
            "provider": "xlsx",
            "filePath": "ballots.xlsx",
            "voterColumnIndex": "3",
            "firstChoiceColumnIndex": 5
        }))
        .unwrap();
        assert_eq!(source.voter_column_index().unwrap(), 2);
        assert_eq!(source.first_choice_column_index().unwrap(), 4);

        let defaults: BallotSource = serde_json::from_value(json!({
            "provider": "xlsx",
            "filePath": "ballots.xlsx"
        }))
        .unwrap();
        assert_eq!(defaults.voter_column_index().unwrap(), 0);
        assert_eq!(defaults.first_choice_column_index().unwrap(), 1);

        let zero: BallotSource = serde_json::from_value(json!({
            "provider": "xlsx",
            "filePath": "ballots.xlsx",
            "voterColumnIndex": 0
        }))
        .unwrap();
        assert!(matches!(
            zero.voter_column_index(),
            Err(SessionError::ParsingJsonNumber { .. })
        ));
    }

    #[test]
    fn session_files_and_reference() {
        init();
        let dir = std::env::temp_dir().join(format!("packvote-session-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let config_p = dir.join("summer_trip.json");
        fs::write(&config_p, SUMMER_TRIP).unwrap();
        let config_s = config_p.display().to_string();
        let summary_s = dir.join("summer_trip_summary.json").display().to_string();

        run_session(config_s.clone(), None, Some(summary_s.clone())).unwrap();
        // Replaying the same session reproduces the saved summary.
        run_session(config_s.clone(), Some(summary_s.clone()), Some("stdout".to_string())).unwrap();

        let mut altered = read_summary(summary_s).unwrap();
        altered["winner"] = JSValue::Null;
        let altered_p = dir.join("altered_summary.json");
        fs::write(&altered_p, serde_json::to_string_pretty(&altered).unwrap()).unwrap();
        let res = run_session(
            config_s,
            Some(altered_p.display().to_string()),
            Some("stdout".to_string()),
        );
        assert!(matches!(res, Err(SessionError::Whatever { .. })));

        let missing = run_session(
            dir.join("missing.json").display().to_string(),
            None,
            None,
        );
        assert!(matches!(missing, Err(SessionError::OpeningJson { .. })));

        fs::remove_dir_all(&dir).unwrap();
    }
}
