use calamine::{open_workbook, DataType, Range, Reader, Xlsx};

use crate::packvote::*;

/// A row of a ballot spreadsheet, before its choices are matched to candidates.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SheetBallot {
    /// 1-based, as displayed by spreadsheet programs.
    pub lineno: usize,
    pub voter: String,
    pub choices: Vec<String>,
}

pub fn read_xlsx_ballots(path: &str, source: &BallotSource) -> SessionResult<Vec<SheetBallot>> {
    let wrange = get_range(path, source)?;
    ballots_from_range(&wrange, source)
}

fn get_range(path: &str, source: &BallotSource) -> SessionResult<Range<DataType>> {
    debug!(
        "get_range: path: {:?} worksheet: {:?}",
        path, source.excel_worksheet_name
    );
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path })?;
    let wrange = match &source.excel_worksheet_name {
        Some(name) => workbook.worksheet_range(name),
        None => workbook.worksheet_range_at(0),
    };
    wrange
        .context(EmptyExcelSnafu {})?
        .context(OpeningExcelSnafu { path })
}

/// Reads one ballot per row. The first row of the sheet is a header.
///
/// Rows without a voter are ignored. The ranking stops at the first empty
/// choice.
pub fn ballots_from_range(
    wrange: &Range<DataType>,
    source: &BallotSource,
) -> SessionResult<Vec<SheetBallot>> {
    let voter_idx = source.voter_column_index()? as u32;
    let first_choice_idx = source.first_choice_column_index()? as u32;
    let (last_row, last_col) = wrange.end().context(EmptyExcelSnafu {})?;
    debug!(
        "ballots_from_range: header: {:?}",
        wrange.rows().next().unwrap_or(&[])
    );

    let mut res: Vec<SheetBallot> = Vec::new();
    for row in 1..=last_row {
        let lineno = (row + 1) as usize;
        let voter = match read_cell(wrange, row, voter_idx)? {
            Some(v) => v,
            None => {
                debug!("ballots_from_range: row {} has no voter", lineno);
                continue;
            }
        };
        let mut choices: Vec<String> = Vec::new();
        for col in first_choice_idx..=last_col {
            match read_cell(wrange, row, col)? {
                Some(c) => choices.push(c),
                None => break,
            }
        }
        debug!(
            "ballots_from_range: row {} voter {:?} choices {:?}",
            lineno, voter, choices
        );
        res.push(SheetBallot {
            lineno,
            voter,
            choices,
        });
    }
    Ok(res)
}

// Positions are absolute: the used range of a sheet does not always start at A1.
fn read_cell(wrange: &Range<DataType>, row: u32, col: u32) -> SessionResult<Option<String>> {
    let cell = match wrange.get_value((row, col)) {
        Some(c) => c,
        None => return Ok(None),
    };
    match cell {
        DataType::String(s) if s.trim().is_empty() => Ok(None),
        DataType::String(s) => Ok(Some(s.trim().to_string())),
        DataType::Int(i) => Ok(Some(i.to_string())),
        DataType::Float(f) if f.fract() == 0.0 => Ok(Some((*f as i64).to_string())),
        DataType::Empty => Ok(None),
        _ => ExcelWrongCellTypeSnafu {
            lineno: (row + 1) as u64,
            content: format!("{:?}", cell),
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(rows: &[&[&str]]) -> Range<DataType> {
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(1) as u32;
        let mut wrange = Range::new((0, 0), (rows.len() as u32 - 1, width - 1));
        for (i, row) in rows.iter().enumerate() {
            for (j, s) in row.iter().enumerate() {
                if !s.is_empty() {
                    wrange.set_value((i as u32, j as u32), DataType::String(s.to_string()));
                }
            }
        }
        wrange
    }

    fn source(voter: u32, first_choice: u32) -> BallotSource {
        serde_json::from_value(json!({
            "provider": "xlsx",
            "filePath": "ballots.xlsx",
            "voterColumnIndex": voter,
            "firstChoiceColumnIndex": first_choice
        }))
        .unwrap()
    }

    #[test]
    fn reads_rows_after_the_header() {
        let wrange = sheet(&[
            &["Name", "First", "Second", "Third"],
            &["ana", "A", "Kyoto", ""],
            &["", "B", "A", ""],
            &["ben", "C", "", "A"],
            &["cleo", "", "", ""],
        ]);
        let ballots = ballots_from_range(&wrange, &source(1, 2)).unwrap();
        assert_eq!(
            ballots,
            vec![
                SheetBallot {
                    lineno: 2,
                    voter: "ana".to_string(),
                    choices: vec!["A".to_string(), "Kyoto".to_string()],
                },
                // The empty cell ends the ranking.
                SheetBallot {
                    lineno: 4,
                    voter: "ben".to_string(),
                    choices: vec!["C".to_string()],
                },
                SheetBallot {
                    lineno: 5,
                    voter: "cleo".to_string(),
                    choices: vec![],
                },
            ]
        );
    }

    #[test]
    fn numeric_voters_and_wrong_cells() {
        let mut wrange = sheet(&[&["Id", "Choice"], &["", "A"]]);
        wrange.set_value((1, 0), DataType::Float(17.0));
        let ballots = ballots_from_range(&wrange, &source(1, 2)).unwrap();
        assert_eq!(ballots[0].voter, "17");

        wrange.set_value((1, 1), DataType::Bool(true));
        assert!(matches!(
            ballots_from_range(&wrange, &source(1, 2)),
            Err(SessionError::ExcelWrongCellType { lineno: 2, .. })
        ));
    }

    #[test]
    fn labels_are_resolved() {
        let registry = CandidateRegistry::new(vec![
            Candidate::new("A", "Lisbon"),
            Candidate::new("B", "Kyoto"),
        ])
        .unwrap();
        let choices = vec!["Kyoto".to_string(), "A".to_string(), "Oslo".to_string()];
        let ids: Vec<CandidateId> = resolve_choices(&registry, &choices);
        assert_eq!(
            ids,
            vec![
                CandidateId::from("B"),
                CandidateId::from("A"),
                CandidateId::from("Oslo")
            ]
        );
    }
}
